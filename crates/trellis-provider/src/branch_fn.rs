use crate::call::ProviderCall;
use crate::types::{ChatMessage, ProviderRequest};
use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use trellis_dispatch::BranchProcessor;
use trellis_tree::{BranchSet, Path};

/// Bridges a provider onto the branch-processing seam: renders one path's
/// correspondence into a chat request, makes one provider call, and returns
/// the answer as the branch's single result item.
///
/// This is what a host component wires between canvas trees and an AI call.
pub struct PromptBranchFn {
    provider: Arc<dyn ProviderCall>,
    model: String,
    endpoint: String,
    system_prompt: Option<String>,
}

impl PromptBranchFn {
    pub fn new(
        provider: Arc<dyn ProviderCall>,
        model: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            endpoint: endpoint.into(),
            system_prompt: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

/// One markdown section per input, items as list entries. Branches arrive
/// already length-normalized, so corresponding items line up by index.
fn render_branches(path: &Path, branches: &BranchSet<String>) -> String {
    let mut out = format!("Branch {path}\n");
    for (name, items) in branches {
        out.push_str(&format!("\n## {name}\n"));
        for item in items {
            out.push_str(&format!("- {item}\n"));
        }
    }
    out
}

#[async_trait::async_trait]
impl BranchProcessor<String, String> for PromptBranchFn {
    async fn process(
        &self,
        path: &Path,
        branches: &BranchSet<String>,
        cancel: CancellationToken,
    ) -> Result<Vec<String>> {
        if branches.values().all(Vec::is_empty) {
            return Ok(Vec::new());
        }
        let mut messages = Vec::new();
        if let Some(system) = &self.system_prompt {
            messages.push(ChatMessage::system(system));
        }
        messages.push(ChatMessage::user(render_branches(path, branches)));

        let request = ProviderRequest::new(&self.model, &self.endpoint).with_messages(messages);
        debug!(path = %path, model = %self.model, "dispatching branch to provider");
        let response = self.provider.call(request, cancel).await?;
        Ok(vec![response.text])
    }
}
