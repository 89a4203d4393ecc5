use crate::types::{ProviderRequest, ProviderResponse};
use anyhow::{bail, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Seam to an AI provider. Implemented by concrete HTTP adapters (external
/// to this workspace) and by [`MockProvider`] in tests. The tree-processing
/// core treats it as an opaque async function.
#[async_trait::async_trait]
pub trait ProviderCall: Send + Sync {
    async fn call(
        &self,
        request: ProviderRequest,
        cancel: CancellationToken,
    ) -> Result<ProviderResponse>;
}

enum MockReply {
    Reply(ProviderResponse),
    Fail(String),
}

/// Scripted provider keyed on the request's last user message. Unscripted
/// prompts echo back, which keeps most tests short.
pub struct MockProvider {
    replies: Mutex<HashMap<String, VecDeque<MockReply>>>,
    calls: Mutex<Vec<ProviderRequest>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue a response for the next call whose last user message contains
    /// `prompt_key`.
    pub fn script(&self, prompt_key: &str, response: ProviderResponse) {
        self.replies
            .lock()
            .unwrap()
            .entry(prompt_key.to_string())
            .or_default()
            .push_back(MockReply::Reply(response));
    }

    /// Queue a failure for the next matching call.
    pub fn fail(&self, prompt_key: &str, message: &str) {
        self.replies
            .lock()
            .unwrap()
            .entry(prompt_key.to_string())
            .or_default()
            .push_back(MockReply::Fail(message.to_string()));
    }

    pub fn calls(&self) -> Vec<ProviderRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ProviderCall for MockProvider {
    async fn call(
        &self,
        request: ProviderRequest,
        cancel: CancellationToken,
    ) -> Result<ProviderResponse> {
        if cancel.is_cancelled() {
            bail!("call cancelled before dispatch");
        }
        let prompt = request.last_user_content().unwrap_or("").to_string();
        self.calls.lock().unwrap().push(request);

        let scripted = {
            let mut replies = self.replies.lock().unwrap();
            let key = replies
                .keys()
                .find(|k| prompt.contains(k.as_str()))
                .cloned();
            key.and_then(|k| replies.get_mut(&k).and_then(VecDeque::pop_front))
        };
        match scripted {
            Some(MockReply::Reply(response)) => Ok(response),
            Some(MockReply::Fail(message)) => bail!("{message}"),
            None => Ok(ProviderResponse::text(format!("echo: {prompt}"))),
        }
    }
}
