//! Agent Discovery
//!
//! The `/.well-known/agent.json` document, and registration of remote agents
//! from theirs. A remote agent's capabilities forward to its `/a2a` endpoint.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::registry::{handler, HandlerError, HandlerTable, WorkerDescriptor};
use crate::rpc::{RpcRequest, RpcResponse};

pub const WELL_KNOWN_PATH: &str = "/.well-known/agent.json";

/// Agent discovery document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCard {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub version: String,
    /// Capability name to input schema
    pub capabilities: BTreeMap<String, Value>,
    /// Endpoint name to absolute URL
    pub endpoints: BTreeMap<String, String>,
}

impl AgentCard {
    /// Card describing `worker`, served from `base_url`
    pub fn for_worker(name: &str, base_url: &str, worker: &WorkerDescriptor) -> Self {
        let base = base_url.trim_end_matches('/');
        let endpoints = [
            ("a2a", "/a2a"),
            ("mcp", "/mcp"),
            ("generate", "/generate"),
            ("health", "/health"),
        ]
        .into_iter()
        .map(|(k, path)| (k.to_string(), format!("{}{}", base, path)))
        .collect();

        Self {
            name: name.to_string(),
            description: "Generates exact-count multiple-choice quizzes".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            capabilities: worker.capabilities.clone(),
            endpoints,
        }
    }

    /// URL of the agent-RPC endpoint
    pub fn a2a_endpoint(&self) -> Option<&str> {
        self.endpoints.get("a2a").map(String::as_str)
    }

    /// Worker descriptor for a remote agent described by this card
    pub fn to_descriptor(&self) -> Result<WorkerDescriptor> {
        let endpoint = self
            .a2a_endpoint()
            .with_context(|| format!("agent card for {} has no a2a endpoint", self.name))?;

        let mut descriptor = WorkerDescriptor::new(&self.name, &self.name).with_endpoint(endpoint);
        descriptor.capabilities = self.capabilities.clone();
        Ok(descriptor)
    }
}

/// Card URL for an agent base URL, or the URL itself if it already names a card
pub fn card_url(url: &str) -> String {
    let url = url.trim_end_matches('/');
    if url.ends_with(".json") {
        url.to_string()
    } else {
        format!("{}{}", url, WELL_KNOWN_PATH)
    }
}

/// Fetch a remote agent's discovery document
pub async fn fetch_card(client: &Client, url: &str) -> Result<AgentCard> {
    let url = card_url(url);
    debug!("Fetching agent card: {}", url);

    let card = client
        .get(&url)
        .send()
        .await
        .with_context(|| format!("failed to reach {}", url))?
        .error_for_status()?
        .json::<AgentCard>()
        .await
        .with_context(|| format!("invalid agent card at {}", url))?;

    info!("Discovered agent {} ({} capabilities)", card.name, card.capabilities.len());
    Ok(card)
}

/// Descriptor and forwarding handlers for a remote agent
pub fn remote_worker(client: &Client, card: &AgentCard) -> Result<(WorkerDescriptor, HandlerTable)> {
    let descriptor = card.to_descriptor()?;
    let endpoint = descriptor.endpoint.clone().unwrap_or_default();

    let handlers: HandlerTable = descriptor
        .capabilities
        .keys()
        .map(|name| {
            let client = client.clone();
            let endpoint = endpoint.clone();
            let capability = name.clone();
            let forward = handler(move |params| {
                let client = client.clone();
                let endpoint = endpoint.clone();
                let capability = capability.clone();
                async move { forward_task(&client, &endpoint, &capability, params).await }
            });
            (name.clone(), forward)
        })
        .collect();

    Ok((descriptor, handlers))
}

/// Submit a task to a remote agent and unwrap its task result
async fn forward_task(client: &Client, endpoint: &str, capability: &str, params: Value) -> Result<Value> {
    let request = RpcRequest::new(
        "task/submit",
        json!({ "capability": capability, "params": params }),
        json!(Uuid::new_v4().to_string()),
    );

    let response: RpcResponse = client
        .post(endpoint)
        .json(&request)
        .send()
        .await
        .with_context(|| format!("failed to reach {}", endpoint))?
        .json()
        .await
        .with_context(|| format!("invalid JSON-RPC response from {}", endpoint))?;

    if let Some(err) = response.error {
        anyhow::bail!("remote agent error {}: {}", err.code, err.message);
    }

    let result = response.result.unwrap_or(Value::Null);
    if result["success"].as_bool() == Some(true) {
        Ok(result.get("payload").cloned().unwrap_or(Value::Null))
    } else {
        let message = format!(
            "remote task failed: {}",
            result["error"]["message"].as_str().unwrap_or("no reason given")
        );
        match result["error"].get("details") {
            Some(details) if !details.is_null() => {
                Err(HandlerError::new(message, details.clone()).into())
            }
            _ => Err(anyhow::anyhow!(message)),
        }
    }
}
