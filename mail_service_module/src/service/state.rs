use std::sync::Arc;

use send_emails_module::PostmarkSender;

use crate::ai::{ClassificationPipeline, ComposePipeline};
use crate::llm::LlmClient;
use crate::notifications::NotificationBus;
use crate::store::MailStore;

use super::config::ServiceConfig;

#[derive(Clone)]
pub struct AppState {
    pub(super) config: Arc<ServiceConfig>,
    pub(super) store: Arc<dyn MailStore>,
    pub(super) bus: Arc<NotificationBus>,
    pub(super) classifier: ClassificationPipeline,
    pub(super) composer: ComposePipeline,
    pub(super) sender: Arc<PostmarkSender>,
}

impl AppState {
    pub fn new(config: ServiceConfig, store: Arc<dyn MailStore>) -> Self {
        let bus = NotificationBus::new(config.sse_max_subscribers, config.sse_ping_interval);
        let llm = LlmClient::new(config.llm.clone());
        let classifier = ClassificationPipeline::new(
            store.clone(),
            llm.clone(),
            bus.clone(),
            config.classify_target,
        );
        let composer = ComposePipeline::new(store.clone(), llm);
        let sender = Arc::new(PostmarkSender::new(
            config.postmark_api_base_url.clone(),
            config.postmark_server_token.clone(),
        ));
        Self {
            config: Arc::new(config),
            store,
            bus,
            classifier,
            composer,
            sender,
        }
    }

    pub fn bus(&self) -> &Arc<NotificationBus> {
        &self.bus
    }

    pub fn store(&self) -> &Arc<dyn MailStore> {
        &self.store
    }
}
