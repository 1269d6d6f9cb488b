use serde::{Deserialize, Serialize};

use entitle_core::ItemId;
use entitle_infra::{PurchaseRoute, StoreProduct};

use crate::error::ClassificationError;

/// What kind of thing the store is selling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Consumable,
    NonConsumable,
    AutoRenewingSubscription,
    NonRenewingSubscription,
}

impl ItemKind {
    /// Parse a platform type tag. Case and surrounding whitespace are ignored.
    ///
    /// `iap` (iOS) and `inapp` (Android) do not distinguish consumables;
    /// they classify as non-consumable, which the store finishes identically.
    pub fn from_type_tag(tag: &str) -> Option<Self> {
        let tag = tag.trim().to_ascii_lowercase();
        match tag.as_str() {
            "consumable" => Some(ItemKind::Consumable),
            "non_consumable" | "iap" | "inapp" => Some(ItemKind::NonConsumable),
            "sub" | "subs" | "auto_renewable" => Some(ItemKind::AutoRenewingSubscription),
            "non_renewing" => Some(ItemKind::NonRenewingSubscription),
            _ => None,
        }
    }

    /// Store call that starts a purchase of this kind.
    pub fn route(self) -> PurchaseRoute {
        match self {
            ItemKind::AutoRenewingSubscription => PurchaseRoute::Subscription,
            ItemKind::Consumable
            | ItemKind::NonConsumable
            | ItemKind::NonRenewingSubscription => PurchaseRoute::OneTime,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntroductoryOffer {
    pub price: String,
    pub period: String,
}

/// A classified item ready to be offered to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchasableItem {
    pub id: ItemId,
    pub kind: ItemKind,
    pub title: String,
    pub description: String,
    pub localized_price: String,
    pub introductory_offer: Option<IntroductoryOffer>,
}

impl PurchasableItem {
    pub fn new(id: ItemId, kind: ItemKind) -> Self {
        Self {
            id,
            kind,
            title: String::new(),
            description: String::new(),
            localized_price: String::new(),
            introductory_offer: None,
        }
    }

    pub fn route(&self) -> PurchaseRoute {
        self.kind.route()
    }
}

/// Turn raw store metadata into a purchasable item.
///
/// An offer is only kept when the store reports both its price and period.
pub fn classify(product: StoreProduct) -> Result<PurchasableItem, ClassificationError> {
    let Some(kind) = ItemKind::from_type_tag(&product.type_tag) else {
        return Err(ClassificationError {
            item_id: product.id,
            type_tag: product.type_tag,
        });
    };

    let introductory_offer = match (product.introductory_price, product.introductory_period) {
        (Some(price), Some(period)) => Some(IntroductoryOffer { price, period }),
        _ => None,
    };

    Ok(PurchasableItem {
        id: product.id,
        kind,
        title: product.title,
        description: product.description,
        localized_price: product.localized_price,
        introductory_offer,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_item_id() -> ItemId {
        ItemId::parse("sub.monthly").unwrap()
    }

    #[test]
    fn subscription_tags_route_to_subscription_requests() {
        for tag in ["sub", "subs", "SUBS", " auto_renewable "] {
            let kind = ItemKind::from_type_tag(tag).unwrap();
            assert_eq!(kind, ItemKind::AutoRenewingSubscription, "tag {tag}");
            assert_eq!(kind.route(), PurchaseRoute::Subscription);
        }
    }

    #[test]
    fn one_time_tags_route_to_purchase_requests() {
        for (tag, expected) in [
            ("iap", ItemKind::NonConsumable),
            ("inapp", ItemKind::NonConsumable),
            ("consumable", ItemKind::Consumable),
            ("non_consumable", ItemKind::NonConsumable),
            ("non_renewing", ItemKind::NonRenewingSubscription),
        ] {
            let kind = ItemKind::from_type_tag(tag).unwrap();
            assert_eq!(kind, expected);
            assert_eq!(kind.route(), PurchaseRoute::OneTime);
        }
    }

    #[test]
    fn classify_keeps_display_metadata_and_offer() {
        let product = StoreProduct::new(test_item_id(), "subs")
            .with_display("Monthly", "All features", "$4.99")
            .with_introductory_offer("$0.99", "P1W");

        let item = classify(product).unwrap();
        assert_eq!(item.kind, ItemKind::AutoRenewingSubscription);
        assert_eq!(item.title, "Monthly");
        assert_eq!(item.localized_price, "$4.99");
        assert_eq!(
            item.introductory_offer,
            Some(IntroductoryOffer {
                price: "$0.99".to_string(),
                period: "P1W".to_string(),
            })
        );
    }

    #[test]
    fn half_an_offer_is_dropped() {
        let mut product = StoreProduct::new(test_item_id(), "subs");
        product.introductory_price = Some("$0.99".to_string());

        assert_eq!(classify(product).unwrap().introductory_offer, None);
    }

    #[test]
    fn unknown_tag_is_an_error() {
        let err = classify(StoreProduct::new(test_item_id(), "bundle")).unwrap_err();
        assert_eq!(err.item_id, test_item_id());
        assert_eq!(err.type_tag, "bundle");
    }

    #[cfg(test)]
    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        const KNOWN: &[&str] = &[
            "consumable",
            "non_consumable",
            "iap",
            "inapp",
            "sub",
            "subs",
            "auto_renewable",
            "non_renewing",
        ];

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 500,
                ..ProptestConfig::default()
            })]

            /// Property: only the known tags classify, whatever their case.
            #[test]
            fn classification_accepts_exactly_the_known_tags(tag in "[A-Za-z_ ]{0,16}") {
                let normalized = tag.trim().to_ascii_lowercase();
                let known = KNOWN.contains(&normalized.as_str());
                prop_assert_eq!(ItemKind::from_type_tag(&tag).is_some(), known);
            }

            /// Property: classification never changes the identifier.
            #[test]
            fn classification_preserves_identity(
                id in "[a-z][a-z0-9._]{0,24}",
                tag_index in 0usize..8,
            ) {
                let item_id = ItemId::parse(&id).unwrap();
                let product = StoreProduct::new(item_id.clone(), KNOWN[tag_index]);
                let item = classify(product).unwrap();
                prop_assert_eq!(item.id, item_id);
            }
        }
    }
}
