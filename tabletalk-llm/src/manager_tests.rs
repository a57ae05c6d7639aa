#[cfg(test)]
mod manager_tests {
    use crate::completion::{CompletionService, Prompt};
    use crate::config::{LLMConfig, Message, MessageRole};
    use crate::error::LLMError;
    use crate::manager::LLMManager;
    use crate::Provider;

    fn manager() -> LLMManager {
        LLMManager::without_env(LLMConfig::default())
    }

    #[test]
    fn test_set_api_key() {
        let manager = manager();
        assert!(!manager.is_configured());
        manager.set_api_key(Provider::OpenAI, "sk-test123".to_string());
        assert!(manager.is_configured());
        assert_eq!(manager.default_provider(), Some(Provider::OpenAI));
    }

    #[test]
    fn test_set_empty_api_key() {
        let manager = manager();
        manager.set_api_key(Provider::OpenAI, "".to_string());
        assert!(!manager.is_configured());
    }

    #[test]
    fn test_set_too_long_api_key() {
        let manager = manager();
        manager.set_api_key(Provider::OpenAI, "a".repeat(2000));
        assert!(!manager.is_configured());
    }

    #[test]
    fn test_first_key_becomes_default() {
        let manager = manager();
        manager.set_api_key(Provider::Anthropic, "sk-ant-1".to_string());
        manager.set_api_key(Provider::OpenAI, "sk-2".to_string());
        assert_eq!(manager.default_provider(), Some(Provider::Anthropic));

        manager.set_default_provider(Provider::OpenAI).unwrap();
        assert_eq!(manager.default_provider(), Some(Provider::OpenAI));
    }

    #[test]
    fn test_set_default_provider_requires_key() {
        let manager = manager();
        assert!(matches!(
            manager.set_default_provider(Provider::Anthropic),
            Err(LLMError::MissingApiKey(_))
        ));
    }

    #[tokio::test]
    async fn test_chat_empty_messages() {
        let result = manager().chat(vec![], None).await;
        match result {
            Err(LLMError::InvalidInput(msg)) => assert!(msg.contains("cannot be empty")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_chat_too_many_messages() {
        let messages: Vec<Message> = (0..150)
            .map(|i| Message {
                role: MessageRole::User,
                content: format!("Message {}", i),
            })
            .collect();
        assert!(matches!(
            manager().chat(messages, None).await,
            Err(LLMError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_chat_message_too_large() {
        let messages = vec![Message::user("a".repeat(200_000))];
        assert!(matches!(
            manager().chat(messages, None).await,
            Err(LLMError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_complete_keeps_input_errors_distinct() {
        let prompt = Prompt {
            instruction: "Return SQL".to_string(),
            body: "q".repeat(100_001),
        };
        let result = manager().complete(&prompt).await;
        assert!(matches!(result, Err(LLMError::InvalidInput(ref m)) if m.contains("too large")));
    }

    #[tokio::test]
    async fn test_chat_without_provider() {
        let result = manager().chat(vec![Message::user("hi")], None).await;
        assert!(matches!(result, Err(LLMError::MissingApiKey(_))));
    }

    #[tokio::test]
    async fn test_complete_without_provider_is_unavailable() {
        let prompt = Prompt {
            instruction: "Return SQL".to_string(),
            body: "How many rows?".to_string(),
        };
        let result = manager().complete(&prompt).await;
        assert!(matches!(result, Err(LLMError::ServiceUnavailable(_))));
    }
}
