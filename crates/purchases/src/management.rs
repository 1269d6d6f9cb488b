//! Platform subscription-management pages.

use entitle_core::{ItemId, Platform};

pub const IOS_MANAGEMENT_URL: &str = "https://apps.apple.com/account/subscriptions";
const ANDROID_MANAGEMENT_BASE: &str = "https://play.google.com/store/account/subscriptions";

/// Page where the user manages (and cancels) their subscription.
///
/// On Android the page can be deep-linked to the package and the subscribed
/// item; without them the store's generic subscriptions page opens.
pub fn management_url(platform: Platform, package: Option<&str>, sku: Option<&ItemId>) -> String {
    match platform {
        Platform::Ios => IOS_MANAGEMENT_URL.to_string(),
        Platform::Android => match (package, sku) {
            (Some(package), Some(sku)) => format!(
                "{ANDROID_MANAGEMENT_BASE}?package={}&sku={}",
                urlencoding::encode(package),
                urlencoding::encode(sku.as_str())
            ),
            (Some(package), None) => {
                format!("{ANDROID_MANAGEMENT_BASE}?package={}", urlencoding::encode(package))
            }
            _ => ANDROID_MANAGEMENT_BASE.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ios_ignores_package_and_sku() {
        let sku = ItemId::parse("sub.a").unwrap();
        assert_eq!(
            management_url(Platform::Ios, Some("com.example"), Some(&sku)),
            IOS_MANAGEMENT_URL
        );
    }

    #[test]
    fn android_deep_links_package_and_sku() {
        let sku = ItemId::parse("sub.plus monthly").unwrap();
        assert_eq!(
            management_url(Platform::Android, Some("com.example.app"), Some(&sku)),
            "https://play.google.com/store/account/subscriptions?package=com.example.app&sku=sub.plus%20monthly"
        );
    }

    #[test]
    fn android_without_package_opens_generic_page() {
        assert_eq!(
            management_url(Platform::Android, None, None),
            ANDROID_MANAGEMENT_BASE
        );
    }
}
