//! # Localization Tests
//!
//! This module contains unit tests for the localization functionality,
//! testing message retrieval and formatting with various edge cases.

use mealbot::localization::LocalizationManager;
use std::collections::HashMap;

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_localization() -> LocalizationManager {
        // Create a new localization manager for each test
        LocalizationManager::new().expect("Failed to create localization manager")
    }

    #[test]
    fn test_get_message_existing_key() {
        let manager = setup_localization();

        let message = manager.get_message_in_language("help-commands", "en", None);
        assert!(!message.is_empty());
        assert!(message.contains("Commands"));
    }

    #[test]
    fn test_get_message_nonexistent_key() {
        let manager = setup_localization();

        let message = manager.get_message_in_language("nonexistent-key", "en", None);
        assert!(message.starts_with("Missing translation:"));
    }

    #[test]
    fn test_get_message_unsupported_language() {
        let manager = setup_localization();

        let message = manager.get_message_in_language("help-commands", "unsupported", None);
        // Should fall back to English
        assert!(!message.is_empty());
        assert!(message.contains("Commands"));
    }

    #[test]
    fn test_get_message_with_args() {
        let manager = setup_localization();

        let mut args = HashMap::new();
        args.insert("used", "2");
        args.insert("limit", "3");

        let message = manager.get_message_in_language("choose-kind", "en", Some(&args));
        assert!(message.contains("2/3"));
    }

    #[test]
    fn test_get_message_missing_args() {
        let manager = setup_localization();

        // Missing args must not panic or produce an empty reply
        let message = manager.get_message_in_language("limit-exceeded", "en", None);
        assert!(!message.is_empty());
    }

    #[test]
    fn test_russian_localization() {
        let manager = setup_localization();

        let message = manager.get_message_in_language("help-commands", "ru", None);
        assert!(!message.is_empty());
        // Russian message should be different from English
        let english_message = manager.get_message_in_language("help-commands", "en", None);
        assert_ne!(message, english_message);
    }

    #[test]
    fn test_language_detection() {
        use mealbot::localization::detect_language;

        assert_eq!(detect_language(Some("en")), "en");
        assert_eq!(detect_language(Some("en-US")), "en");
        assert_eq!(detect_language(Some("ru")), "ru");
        assert_eq!(detect_language(Some("ru-RU")), "ru");
        assert_eq!(detect_language(None), "en"); // Default to English
        assert_eq!(detect_language(Some("unsupported")), "en"); // Fallback to English
    }

    #[test]
    fn test_convenience_functions() {
        // Initialize the global localization manager for this test
        mealbot::localization::init_localization().expect("Failed to initialize localization");

        let message = mealbot::localization::t_lang("help-commands", Some("en"));
        assert!(!message.is_empty());

        let args = vec![("used", "3"), ("limit", "3")];
        let message_with_args = mealbot::localization::t_args_lang("limit-exceeded", &args, Some("en"));
        assert!(message_with_args.contains("3/3"));
    }
}
