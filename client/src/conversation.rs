//! Conversational LLM API: Alpha1 single-shot and Alpha2 streaming, with
//! tool definitions, tool-call results, and parameter wrapping into the
//! wire's `Any`-wrapped well-known types.

use std::collections::HashMap;

use futures_util::{Stream, StreamExt};
use prost_types::Any;
use tonic::transport::Channel;

use crate::envelope::Envelope;
use crate::error::Result;
use crate::pb;

/// A loosely-typed parameter value, converted to the wire's well-known
/// wrapper types on send. Booleans are checked before integers so a `bool`
/// never round-trips as an `Int32Value`.
#[derive(Debug, Clone)]
pub enum Parameter {
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Raw(Any),
}

impl From<bool> for Parameter {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Parameter {
    fn from(v: i64) -> Self {
        if let Ok(v32) = i32::try_from(v) {
            Self::Int32(v32)
        } else {
            Self::Int64(v)
        }
    }
}

impl From<f64> for Parameter {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for Parameter {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Vec<u8>> for Parameter {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<Any> for Parameter {
    fn from(v: Any) -> Self {
        Self::Raw(v)
    }
}

impl Parameter {
    /// Wraps this value as a `google.protobuf.Any` carrying the matching
    /// well-known wrapper message. `Raw` values pass through unchanged.
    #[must_use]
    pub fn into_any(self) -> Any {
        match self {
            Self::Bool(v) => wrap("google.protobuf.BoolValue", prost_types::BoolValue { value: v }),
            Self::Int32(v) => wrap("google.protobuf.Int32Value", prost_types::Int32Value { value: v }),
            Self::Int64(v) => wrap("google.protobuf.Int64Value", prost_types::Int64Value { value: v }),
            Self::Float(v) => wrap("google.protobuf.DoubleValue", prost_types::DoubleValue { value: v }),
            Self::Str(v) => wrap("google.protobuf.StringValue", prost_types::StringValue { value: v }),
            Self::Bytes(v) => wrap("google.protobuf.BytesValue", prost_types::BytesValue { value: v }),
            Self::Raw(any) => any,
        }
    }
}

fn wrap<M: prost::Message>(type_url_suffix: &str, message: M) -> Any {
    Any {
        type_url: format!("type.googleapis.com/{type_url_suffix}"),
        value: message.encode_to_vec(),
    }
}

/// A function tool definition offered to the model.
#[derive(Debug, Clone)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub parameters_json_schema: String,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments_json: String,
}

/// The application's result for a previously requested tool call.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub name: String,
    pub content: String,
    pub is_error: bool,
}

/// One part of a conversation turn's content.
#[derive(Debug, Clone)]
pub enum ContentPart {
    Text(String),
    ToolCall(ToolCall),
    ToolResult(ToolResult),
}

/// A single turn in the conversation.
#[derive(Debug, Clone)]
pub struct ConversationInput {
    pub role: String,
    pub content: Vec<ContentPart>,
}

/// Assembles the `user -> assistant(tool_calls) -> tool_result(s) -> user`
/// history shape the conversation RPCs expect.
#[derive(Debug, Clone, Default)]
pub struct ConversationHistoryBuilder {
    inputs: Vec<ConversationInput>,
}

impl ConversationHistoryBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn user(mut self, text: impl Into<String>) -> Self {
        self.inputs.push(ConversationInput {
            role: "user".to_owned(),
            content: vec![ContentPart::Text(text.into())],
        });
        self
    }

    #[must_use]
    pub fn assistant_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.inputs.push(ConversationInput {
            role: "assistant".to_owned(),
            content: calls.into_iter().map(ContentPart::ToolCall).collect(),
        });
        self
    }

    #[must_use]
    pub fn tool_results(mut self, results: Vec<ToolResult>) -> Self {
        self.inputs.push(ConversationInput {
            role: "tool".to_owned(),
            content: results.into_iter().map(ContentPart::ToolResult).collect(),
        });
        self
    }

    #[must_use]
    pub fn build(self) -> Vec<ConversationInput> {
        self.inputs
    }
}

fn content_part_into_wire(part: ContentPart) -> pb::ConversationMessageContentAlpha1 {
    let content_type = match part {
        ContentPart::Text(text) => pb::conversation_message_content_alpha1::ContentType::Text(text),
        ContentPart::ToolCall(call) => {
            pb::conversation_message_content_alpha1::ContentType::ToolCall(pb::ConversationToolCallsAlpha1 {
                id: call.id,
                name: call.name,
                arguments_json: call.arguments_json,
            })
        }
        ContentPart::ToolResult(result) => {
            pb::conversation_message_content_alpha1::ContentType::ToolResult(pb::ConversationToolResultAlpha1 {
                tool_call_id: result.tool_call_id,
                name: result.name,
                content: result.content,
                is_error: result.is_error,
            })
        }
    };
    pb::ConversationMessageContentAlpha1 {
        content_type: Some(content_type),
    }
}

fn input_into_wire(input: ConversationInput) -> pb::ConversationInputAlpha1 {
    pb::ConversationInputAlpha1 {
        role: input.role,
        content: input.content.into_iter().map(content_part_into_wire).collect(),
    }
}

fn tool_into_wire(tool: Tool) -> pb::ConversationToolsAlpha1 {
    pb::ConversationToolsAlpha1 {
        function: Some(pb::ConversationToolsFunctionAlpha1 {
            name: tool.name,
            description: tool.description,
            parameters_json_schema: tool.parameters_json_schema,
        }),
    }
}

/// One output returned by the single-shot Alpha1 call.
#[derive(Debug, Clone)]
pub struct ConversationResult {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

/// Token accounting for a completed conversation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConversationUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// One chunk of a streaming Alpha2 response.
#[derive(Debug, Clone)]
pub struct ConverseStreamChunk {
    pub context_id: String,
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<String>,
    pub index: u32,
    pub usage: Option<ConversationUsage>,
}

/// Typed facade over `ConverseAlpha1`/`ConverseStreamAlpha2`.
#[derive(Clone)]
pub struct ConversationClient {
    pub(crate) inner: pb::runtime_client::RuntimeClient<Channel>,
    pub(crate) envelope: Envelope,
}

impl ConversationClient {
    pub(crate) fn new(inner: pb::runtime_client::RuntimeClient<Channel>, envelope: Envelope) -> Self {
        Self { inner, envelope }
    }

    /// Issues a single-shot conversation turn.
    #[allow(clippy::too_many_arguments)]
    pub async fn converse(
        &self,
        name: &str,
        inputs: Vec<ConversationInput>,
        parameters: HashMap<String, Parameter>,
        context_id: Option<String>,
        tools: Vec<Tool>,
        tool_choice: Option<String>,
        temperature: f32,
    ) -> Result<(String, Vec<ConversationResult>)> {
        let request = self.envelope.apply(tonic::Request::new(pb::ConverseRequestAlpha1 {
            name: name.to_owned(),
            inputs: inputs.into_iter().map(input_into_wire).collect(),
            parameters: parameters
                .into_iter()
                .map(|(k, v)| (k, v.into_any()))
                .collect(),
            context_id: context_id.unwrap_or_default(),
            tools: tools.into_iter().map(tool_into_wire).collect(),
            tool_choice: tool_choice.unwrap_or_default(),
            temperature,
        }))?;

        let response = self.inner.clone().converse_alpha1(request).await?.into_inner();

        let outputs = response
            .outputs
            .into_iter()
            .map(|o| ConversationResult {
                text: o.result,
                tool_calls: o
                    .tool_calls
                    .into_iter()
                    .map(|c| ToolCall {
                        id: c.id,
                        name: c.name,
                        arguments_json: c.arguments_json,
                    })
                    .collect(),
            })
            .collect();

        Ok((response.context_id, outputs))
    }

    /// Issues a streaming conversation turn, yielding chunks as they arrive.
    #[allow(clippy::too_many_arguments)]
    pub async fn converse_stream(
        &self,
        name: &str,
        inputs: Vec<ConversationInput>,
        parameters: HashMap<String, Parameter>,
        context_id: Option<String>,
        tools: Vec<Tool>,
        tool_choice: Option<String>,
        temperature: f32,
    ) -> Result<impl Stream<Item = Result<ConverseStreamChunk>>> {
        let request = self.envelope.apply(tonic::Request::new(pb::ConverseStreamRequestAlpha2 {
            name: name.to_owned(),
            inputs: inputs.into_iter().map(input_into_wire).collect(),
            parameters: parameters
                .into_iter()
                .map(|(k, v)| (k, v.into_any()))
                .collect(),
            context_id: context_id.unwrap_or_default(),
            tools: tools.into_iter().map(tool_into_wire).collect(),
            tool_choice: tool_choice.unwrap_or_default(),
            temperature,
        }))?;

        let stream = self
            .inner
            .clone()
            .converse_stream_alpha2(request)
            .await?
            .into_inner();

        Ok(stream.map(|result| {
            let response = result?;
            let choice = response.choices.into_iter().next().unwrap_or_default();
            let delta = choice.delta.unwrap_or_default();
            Ok(ConverseStreamChunk {
                context_id: response.context_id,
                content: delta.content,
                tool_calls: delta
                    .tool_calls
                    .into_iter()
                    .map(|c| ToolCall {
                        id: c.id,
                        name: c.name,
                        arguments_json: c.arguments_json,
                    })
                    .collect(),
                finish_reason: (!choice.finish_reason.is_empty()).then_some(choice.finish_reason),
                index: choice.index,
                usage: response.usage.map(|u| ConversationUsage {
                    prompt_tokens: u.prompt_tokens,
                    completion_tokens: u.completion_tokens,
                    total_tokens: u.total_tokens,
                }),
            })
        }))
    }
}
