use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::{with_store, MailStore, SettingsOverrides};

use super::PipelineError;

/// Effective AI configuration: hardcoded defaults, then the persisted
/// partial, then any caller partial. An absent settings row means the
/// defaults apply everywhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AiSettings {
    pub auto_classify: bool,
    pub auto_apply_labels: bool,
    pub min_confidence: u8,
    pub generate_summaries: bool,
    pub generate_smart_replies: bool,
    pub compose_assist: bool,
    pub use_knowledge_base: bool,
    pub reply_tone: String,
    pub max_context_messages: u32,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            auto_classify: true,
            auto_apply_labels: false,
            min_confidence: 70,
            generate_summaries: true,
            generate_smart_replies: true,
            compose_assist: true,
            use_knowledge_base: true,
            reply_tone: "professional".to_string(),
            max_context_messages: 10,
        }
    }
}

impl AiSettings {
    fn validate(&self) -> Result<(), PipelineError> {
        if self.min_confidence > 100 {
            return Err(PipelineError::Invalid(
                "minConfidence must be between 0 and 100".to_string(),
            ));
        }
        if !(2..=50).contains(&self.max_context_messages) {
            return Err(PipelineError::Invalid(
                "maxContextMessages must be between 2 and 50".to_string(),
            ));
        }
        if self.reply_tone.trim().is_empty() {
            return Err(PipelineError::Invalid("replyTone cannot be empty".to_string()));
        }
        Ok(())
    }
}

/// Shallow merge of the layers over the defaults; later layers win.
pub fn merge_settings(layers: &[&SettingsOverrides]) -> Result<AiSettings, PipelineError> {
    let mut merged = match serde_json::to_value(AiSettings::default()) {
        Ok(Value::Object(map)) => map,
        _ => SettingsOverrides::new(),
    };
    for layer in layers {
        for (key, value) in layer.iter() {
            merged.insert(key.clone(), value.clone());
        }
    }
    let settings: AiSettings = serde_json::from_value(Value::Object(merged))
        .map_err(|err| PipelineError::Invalid(format!("invalid settings: {err}")))?;
    settings.validate()?;
    Ok(settings)
}

pub async fn load_settings(store: &Arc<dyn MailStore>) -> Result<AiSettings, PipelineError> {
    let persisted = with_store(store, |store| store.load_settings_overrides()).await?;
    match persisted {
        Some(overrides) => merge_settings(&[&overrides]),
        None => Ok(AiSettings::default()),
    }
}

/// Merges `caller` over the persisted partial, stores the combined partial
/// and returns the effective settings. Invalid input leaves storage alone.
pub async fn update_settings(
    store: &Arc<dyn MailStore>,
    caller: SettingsOverrides,
) -> Result<AiSettings, PipelineError> {
    let mut overrides = with_store(store, |store| store.load_settings_overrides())
        .await?
        .unwrap_or_default();
    for (key, value) in caller {
        overrides.insert(key, value);
    }
    let settings = merge_settings(&[&overrides])?;
    with_store(store, move |store| store.save_settings_overrides(&overrides)).await?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::MemoryMailStore;

    fn overrides(value: Value) -> SettingsOverrides {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn later_layers_win() {
        let persisted = overrides(json!({"replyTone": "friendly", "minConfidence": 60}));
        let caller = overrides(json!({"minConfidence": 85}));
        let settings = merge_settings(&[&persisted, &caller]).unwrap();
        assert_eq!(settings.reply_tone, "friendly");
        assert_eq!(settings.min_confidence, 85);
        assert!(settings.generate_summaries);
    }

    #[test]
    fn unknown_keys_and_bad_values_are_rejected() {
        let unknown = overrides(json!({"generateHaiku": true}));
        assert!(matches!(
            merge_settings(&[&unknown]),
            Err(PipelineError::Invalid(_))
        ));
        let wrong_type = overrides(json!({"composeAssist": "yes"}));
        assert!(merge_settings(&[&wrong_type]).is_err());
        let out_of_range = overrides(json!({"minConfidence": 140}));
        assert!(merge_settings(&[&out_of_range]).is_err());
    }

    #[tokio::test]
    async fn absent_row_means_defaults() {
        let store: Arc<dyn MailStore> = Arc::new(MemoryMailStore::new());
        assert_eq!(load_settings(&store).await.unwrap(), AiSettings::default());
    }

    #[tokio::test]
    async fn first_update_changes_only_the_given_field() {
        let store: Arc<dyn MailStore> = Arc::new(MemoryMailStore::new());
        let settings = update_settings(&store, overrides(json!({"generateSmartReplies": false})))
            .await
            .unwrap();

        let expected = AiSettings {
            generate_smart_replies: false,
            ..AiSettings::default()
        };
        assert_eq!(settings, expected);
        assert_eq!(load_settings(&store).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn updates_accumulate_and_invalid_updates_are_not_stored() {
        let store: Arc<dyn MailStore> = Arc::new(MemoryMailStore::new());
        update_settings(&store, overrides(json!({"replyTone": "warm"})))
            .await
            .unwrap();
        update_settings(&store, overrides(json!({"autoApplyLabels": true})))
            .await
            .unwrap();
        assert!(update_settings(&store, overrides(json!({"maxContextMessages": 0})))
            .await
            .is_err());

        let settings = load_settings(&store).await.unwrap();
        assert_eq!(settings.reply_tone, "warm");
        assert!(settings.auto_apply_labels);
        assert_eq!(settings.max_context_messages, 10);
    }
}
