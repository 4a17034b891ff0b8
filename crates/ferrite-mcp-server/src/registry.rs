//! The handler registry. Owns every registered tool, resource, resource
//! template, and prompt; pre-computes each one's JSON Schema and wire bytes
//! exactly once, at registration, and serves `*/list` and `*/call`-or-`/read`
//! operations against those cached forms.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use ferrite_mcp_core::Context;
use ferrite_mcp_types::{
    build_input_schema, FieldSpec, Icon, PromptArgument, PromptDescriptor, ResourceDescriptor,
    ResourceTemplateDescriptor, ToolAnnotations, ToolDescriptor,
};
use serde_json::Value;

use crate::error::HandlerError;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A tool's implementation: takes the request context and its arguments
/// object, returns the raw (unnormalized) return value.
pub type ToolFn = Arc<dyn Fn(Context, Value) -> BoxFuture<Result<Value, ferrite_mcp_core::McpError>> + Send + Sync>;

/// A resource's implementation: takes the request context, returns the
/// resource contents (text or blob, as a JSON value matching
/// `EmbeddedResource`'s shape).
pub type ResourceFn = Arc<dyn Fn(Context) -> BoxFuture<Result<Value, ferrite_mcp_core::McpError>> + Send + Sync>;

/// A resource template's implementation: takes the request context and the
/// URI template variables bound from a concrete request URI.
pub type ResourceTemplateFn =
    Arc<dyn Fn(Context, BTreeMap<String, String>) -> BoxFuture<Result<Value, ferrite_mcp_core::McpError>> + Send + Sync>;

/// A prompt's implementation: takes the request context and its arguments,
/// returns the rendered message list.
pub type PromptFn = Arc<dyn Fn(Context, Value) -> BoxFuture<Result<Value, ferrite_mcp_core::McpError>> + Send + Sync>;

/// A `completion/complete` provider for one `ref.type` (`ref/resource` or
/// `ref/prompt`): takes the reference value and the partial argument being
/// completed, returns candidate strings.
pub type CompletionFn =
    Arc<dyn Fn(Context, Value, Value) -> BoxFuture<Result<Vec<String>, ferrite_mcp_core::McpError>> + Send + Sync>;

const NAME_MAX_LEN: usize = 128;

fn validate_name(name: &str) -> Result<(), HandlerError> {
    let valid = !name.is_empty()
        && name.len() <= NAME_MAX_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(HandlerError::InvalidName(name.to_string()))
    }
}

#[derive(Default, Clone)]
pub struct ToolOptions {
    pub description: Option<String>,
    pub read_only_hint: Option<bool>,
    pub destructive_hint: Option<bool>,
    pub idempotent_hint: Option<bool>,
    pub open_world_hint: Option<bool>,
    pub output_schema: Option<Value>,
    pub icons: Vec<Icon>,
    pub website_url: Option<String>,
    pub meta: Option<Value>,
    pub requires_auth: bool,
    pub auth_scopes: Vec<String>,
    pub rate_limit_rps: Option<f64>,
    /// Run the handler in the background and answer `tools/call` with a
    /// `{taskId, status}` reference instead of waiting for it to finish.
    pub long_running: bool,
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    bytes: Bytes,
    handler: ToolFn,
    requires_auth: bool,
    auth_scopes: Vec<String>,
    rate_limit_rps: Option<f64>,
    long_running: bool,
}

#[derive(Default, Clone)]
pub struct ResourceOptions {
    pub name: Option<String>,
    pub description: Option<String>,
    pub mime_type: Option<String>,
    pub icons: Vec<Icon>,
    pub meta: Option<Value>,
}

struct RegisteredResource {
    descriptor: ResourceDescriptor,
    bytes: Bytes,
    handler: ResourceFn,
}

#[derive(Default, Clone)]
pub struct ResourceTemplateOptions {
    pub name: Option<String>,
    pub description: Option<String>,
    pub mime_type: Option<String>,
    pub icons: Vec<Icon>,
}

struct RegisteredResourceTemplate {
    descriptor: ResourceTemplateDescriptor,
    bytes: Bytes,
    handler: ResourceTemplateFn,
}

#[derive(Default, Clone)]
pub struct PromptOptions {
    pub description: Option<String>,
    pub arguments: Vec<PromptArgument>,
}

struct RegisteredPrompt {
    descriptor: PromptDescriptor,
    bytes: Bytes,
    handler: PromptFn,
}

/// Opaque pagination cursor: an insertion index into the kind's ordered map.
/// Not guaranteed stable across a process restart, only within one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor(usize);

impl Cursor {
    fn encode(self) -> String {
        self.0.to_string()
    }

    fn decode(s: &str) -> Option<Self> {
        s.parse().ok().map(Cursor)
    }
}

fn paginate<T>(items: &[(String, T)], cursor: Option<&str>, limit: Option<usize>) -> (Vec<&T>, Option<String>) {
    let start = cursor.and_then(Cursor::decode).map(|c| c.0).unwrap_or(0);
    let limit = limit.unwrap_or(usize::MAX);
    let page: Vec<&T> = items.iter().skip(start).take(limit).map(|(_, v)| v).collect();
    let next = if start + page.len() < items.len() {
        Some(Cursor(start + page.len()).encode())
    } else {
        None
    };
    (page, next)
}

/// The registry is built once via `register_*` calls, then handed to the
/// dispatcher as a read-only `Arc` — no further mutation happens during
/// steady-state dispatch except through explicit `invalidate`, which is rare
/// and serialized by the same lock used for registration.
#[derive(Default)]
pub struct HandlerRegistry {
    tools: parking_lot::RwLock<BTreeMap<String, RegisteredTool>>,
    tool_order: parking_lot::RwLock<Vec<String>>,
    resources: parking_lot::RwLock<BTreeMap<String, RegisteredResource>>,
    resource_order: parking_lot::RwLock<Vec<String>>,
    resource_templates: parking_lot::RwLock<BTreeMap<String, RegisteredResourceTemplate>>,
    resource_template_order: parking_lot::RwLock<Vec<String>>,
    prompts: parking_lot::RwLock<BTreeMap<String, RegisteredPrompt>>,
    prompt_order: parking_lot::RwLock<Vec<String>>,
    completion_providers: parking_lot::RwLock<BTreeMap<String, CompletionFn>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_tool(
        &self,
        name: impl Into<String>,
        fields: &[FieldSpec],
        handler: ToolFn,
        options: ToolOptions,
    ) -> Result<(), HandlerError> {
        let name = name.into();
        validate_name(&name)?;
        let mut tools = self.tools.write();
        if tools.contains_key(&name) {
            return Err(HandlerError::DuplicateName(name));
        }
        let input_schema = build_input_schema(fields);
        let annotations = if options.read_only_hint.is_some()
            || options.destructive_hint.is_some()
            || options.idempotent_hint.is_some()
            || options.open_world_hint.is_some()
        {
            Some(ToolAnnotations {
                read_only_hint: options.read_only_hint,
                destructive_hint: options.destructive_hint,
                idempotent_hint: options.idempotent_hint,
                open_world_hint: options.open_world_hint,
            })
        } else {
            None
        };
        let descriptor = ToolDescriptor {
            name: name.clone(),
            description: options.description.clone(),
            input_schema,
            output_schema: options.output_schema.clone(),
            annotations,
            icons: options.icons.clone(),
            website_url: options.website_url.clone(),
            meta: options.meta.clone(),
        };
        let bytes = Bytes::from(serde_json::to_vec(&descriptor).expect("descriptor always serializes"));
        tools.insert(
            name.clone(),
            RegisteredTool {
                descriptor,
                bytes,
                handler,
                requires_auth: options.requires_auth,
                auth_scopes: options.auth_scopes,
                rate_limit_rps: options.rate_limit_rps,
                long_running: options.long_running,
            },
        );
        self.tool_order.write().push(name);
        Ok(())
    }

    pub fn register_resource(
        &self,
        uri: impl Into<String>,
        handler: ResourceFn,
        options: ResourceOptions,
    ) -> Result<(), HandlerError> {
        let uri = uri.into();
        let mut resources = self.resources.write();
        if resources.contains_key(&uri) {
            return Err(HandlerError::DuplicateName(uri));
        }
        let descriptor = ResourceDescriptor {
            uri: uri.clone(),
            name: options.name.clone(),
            description: options.description.clone(),
            mime_type: options.mime_type.clone(),
            icons: options.icons.clone(),
            meta: options.meta.clone(),
        };
        let bytes = Bytes::from(serde_json::to_vec(&descriptor).expect("descriptor always serializes"));
        resources.insert(uri.clone(), RegisteredResource { descriptor, bytes, handler });
        self.resource_order.write().push(uri);
        Ok(())
    }

    pub fn register_resource_template(
        &self,
        uri_template: impl Into<String>,
        handler: ResourceTemplateFn,
        options: ResourceTemplateOptions,
    ) -> Result<(), HandlerError> {
        let uri_template = uri_template.into();
        let mut templates = self.resource_templates.write();
        if templates.contains_key(&uri_template) {
            return Err(HandlerError::DuplicateName(uri_template));
        }
        let descriptor = ResourceTemplateDescriptor {
            uri_template: uri_template.clone(),
            name: options.name.clone(),
            description: options.description.clone(),
            mime_type: options.mime_type.clone(),
            icons: options.icons.clone(),
        };
        let bytes = Bytes::from(serde_json::to_vec(&descriptor).expect("descriptor always serializes"));
        templates.insert(
            uri_template.clone(),
            RegisteredResourceTemplate { descriptor, bytes, handler },
        );
        self.resource_template_order.write().push(uri_template);
        Ok(())
    }

    pub fn register_prompt(
        &self,
        name: impl Into<String>,
        handler: PromptFn,
        options: PromptOptions,
    ) -> Result<(), HandlerError> {
        let name = name.into();
        validate_name(&name)?;
        let mut prompts = self.prompts.write();
        if prompts.contains_key(&name) {
            return Err(HandlerError::DuplicateName(name));
        }
        let descriptor = PromptDescriptor {
            name: name.clone(),
            description: options.description.clone(),
            arguments: options.arguments.clone(),
        };
        let bytes = Bytes::from(serde_json::to_vec(&descriptor).expect("descriptor always serializes"));
        prompts.insert(name.clone(), RegisteredPrompt { descriptor, bytes, handler });
        self.prompt_order.write().push(name);
        Ok(())
    }

    /// Recompute a tool's cached schema/bytes, e.g. after changing its
    /// description. Never mutates the cached bytes in place; replaces them.
    pub fn invalidate_tool(&self, name: &str, fields: &[FieldSpec], options: ToolOptions) -> Result<(), HandlerError> {
        let handler = {
            let tools = self.tools.read();
            tools.get(name).map(|t| t.handler.clone())
        };
        let Some(handler) = handler else {
            return Err(HandlerError::InvalidName(name.to_string()));
        };
        self.tools.write().remove(name);
        self.tool_order.write().retain(|n| n != name);
        self.register_tool(name, fields, handler, options)
    }

    pub fn list_tools(&self, cursor: Option<&str>, limit: Option<usize>) -> (Vec<Bytes>, Option<String>) {
        let order = self.tool_order.read();
        let tools = self.tools.read();
        let items: Vec<(String, Bytes)> = order
            .iter()
            .filter_map(|n| tools.get(n).map(|t| (n.clone(), t.bytes.clone())))
            .collect();
        let (page, next) = paginate(&items, cursor, limit);
        (page.into_iter().cloned().collect(), next)
    }

    pub fn list_resources(&self, cursor: Option<&str>, limit: Option<usize>) -> (Vec<Bytes>, Option<String>) {
        let order = self.resource_order.read();
        let resources = self.resources.read();
        let items: Vec<(String, Bytes)> = order
            .iter()
            .filter_map(|n| resources.get(n).map(|r| (n.clone(), r.bytes.clone())))
            .collect();
        let (page, next) = paginate(&items, cursor, limit);
        (page.into_iter().cloned().collect(), next)
    }

    pub fn list_resource_templates(&self, cursor: Option<&str>, limit: Option<usize>) -> (Vec<Bytes>, Option<String>) {
        let order = self.resource_template_order.read();
        let templates = self.resource_templates.read();
        let items: Vec<(String, Bytes)> = order
            .iter()
            .filter_map(|n| templates.get(n).map(|t| (n.clone(), t.bytes.clone())))
            .collect();
        let (page, next) = paginate(&items, cursor, limit);
        (page.into_iter().cloned().collect(), next)
    }

    pub fn list_prompts(&self, cursor: Option<&str>, limit: Option<usize>) -> (Vec<Bytes>, Option<String>) {
        let order = self.prompt_order.read();
        let prompts = self.prompts.read();
        let items: Vec<(String, Bytes)> = order
            .iter()
            .filter_map(|n| prompts.get(n).map(|p| (n.clone(), p.bytes.clone())))
            .collect();
        let (page, next) = paginate(&items, cursor, limit);
        (page.into_iter().cloned().collect(), next)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tool_order.read().clone()
    }

    pub fn tool_count(&self) -> usize {
        self.tools.read().len()
    }

    pub fn resource_count(&self) -> usize {
        self.resources.read().len()
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.read().len()
    }

    pub fn call_tool(&self, ctx: Context, name: &str, args: Value) -> Option<BoxFuture<Result<Value, ferrite_mcp_core::McpError>>> {
        let tools = self.tools.read();
        let tool = tools.get(name)?;
        Some((tool.handler)(ctx, args))
    }

    pub fn tool_requires_auth(&self, name: &str) -> Option<(bool, Vec<String>)> {
        let tools = self.tools.read();
        tools.get(name).map(|t| (t.requires_auth, t.auth_scopes.clone()))
    }

    pub fn tool_rate_limit(&self, name: &str) -> Option<f64> {
        self.tools.read().get(name).and_then(|t| t.rate_limit_rps)
    }

    pub fn tool_is_long_running(&self, name: &str) -> bool {
        self.tools.read().get(name).map(|t| t.long_running).unwrap_or(false)
    }

    pub fn tool_input_schema(&self, name: &str) -> Option<Value> {
        self.tools.read().get(name).map(|t| t.descriptor.input_schema.clone())
    }

    pub fn tool_output_schema(&self, name: &str) -> Option<Value> {
        self.tools.read().get(name).and_then(|t| t.descriptor.output_schema.clone())
    }

    pub fn read_resource(&self, ctx: Context, uri: &str) -> Option<BoxFuture<Result<Value, ferrite_mcp_core::McpError>>> {
        let resources = self.resources.read();
        let resource = resources.get(uri)?;
        Some((resource.handler)(ctx))
    }

    pub fn read_resource_template(
        &self,
        ctx: Context,
        uri_template: &str,
        vars: BTreeMap<String, String>,
    ) -> Option<BoxFuture<Result<Value, ferrite_mcp_core::McpError>>> {
        let templates = self.resource_templates.read();
        let template = templates.get(uri_template)?;
        Some((template.handler)(ctx, vars))
    }

    pub fn get_prompt(&self, ctx: Context, name: &str, args: Value) -> Option<BoxFuture<Result<Value, ferrite_mcp_core::McpError>>> {
        let prompts = self.prompts.read();
        let prompt = prompts.get(name)?;
        Some((prompt.handler)(ctx, args))
    }

    /// Register a completion provider for one `ref.type` value
    /// (`ref/resource` or `ref/prompt`). Re-registering the same type
    /// replaces the previous provider.
    pub fn register_completion_provider(&self, ref_type: impl Into<String>, provider: CompletionFn) {
        self.completion_providers.write().insert(ref_type.into(), provider);
    }

    pub fn complete(
        &self,
        ctx: Context,
        ref_type: &str,
        reference: Value,
        argument: Value,
    ) -> Option<BoxFuture<Result<Vec<String>, ferrite_mcp_core::McpError>>> {
        let providers = self.completion_providers.read();
        let provider = providers.get(ref_type)?;
        Some(provider(ctx, reference, argument))
    }

    /// Suggest the closest registered tool name by normalized Jaro-Winkler
    /// similarity, for a call against an unregistered name. Returns `None`
    /// if the best match scores below 0.6 or there are no tools registered.
    pub fn suggest_tool_name(&self, attempted: &str) -> Option<String> {
        let order = self.tool_order.read();
        order
            .iter()
            .map(|name| (name.clone(), strsim::jaro_winkler(attempted, name)))
            .filter(|(_, score)| *score >= 0.6)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(name, _)| name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrite_mcp_types::FieldType;

    fn noop_tool() -> ToolFn {
        Arc::new(|_ctx, args| Box::pin(async move { Ok(args) }))
    }

    #[test]
    fn duplicate_registration_rejected() {
        let registry = HandlerRegistry::new();
        registry
            .register_tool("add", &[], noop_tool(), ToolOptions::default())
            .unwrap();
        let err = registry
            .register_tool("add", &[], noop_tool(), ToolOptions::default())
            .unwrap_err();
        assert_eq!(err, HandlerError::DuplicateName("add".into()));
    }

    #[test]
    fn invalid_name_rejected() {
        let registry = HandlerRegistry::new();
        let err = registry
            .register_tool("bad name!", &[], noop_tool(), ToolOptions::default())
            .unwrap_err();
        assert!(matches!(err, HandlerError::InvalidName(_)));
    }

    #[test]
    fn schema_is_stable_until_invalidated() {
        let registry = HandlerRegistry::new();
        let fields = vec![FieldSpec::new("a", FieldType::Integer)];
        registry
            .register_tool("add", &fields, noop_tool(), ToolOptions::default())
            .unwrap();
        let (first, _) = registry.list_tools(None, None);
        let (second, _) = registry.list_tools(None, None);
        assert_eq!(first, second);
    }

    #[test]
    fn pagination_advances_by_cursor() {
        let registry = HandlerRegistry::new();
        for i in 0..5 {
            registry
                .register_tool(format!("tool{i}"), &[], noop_tool(), ToolOptions::default())
                .unwrap();
        }
        let (page1, cursor1) = registry.list_tools(None, Some(2));
        assert_eq!(page1.len(), 2);
        let cursor1 = cursor1.unwrap();
        let (page2, cursor2) = registry.list_tools(Some(&cursor1), Some(2));
        assert_eq!(page2.len(), 2);
        assert_ne!(page1, page2);
        let cursor2 = cursor2.unwrap();
        let (page3, cursor3) = registry.list_tools(Some(&cursor2), Some(2));
        assert_eq!(page3.len(), 1);
        assert!(cursor3.is_none());
    }

    #[test]
    fn suggests_close_tool_name() {
        let registry = HandlerRegistry::new();
        registry
            .register_tool("add_numbers", &[], noop_tool(), ToolOptions::default())
            .unwrap();
        let suggestion = registry.suggest_tool_name("add_numers");
        assert_eq!(suggestion.as_deref(), Some("add_numbers"));
    }

    #[test]
    fn no_suggestion_below_cutoff() {
        let registry = HandlerRegistry::new();
        registry
            .register_tool("add_numbers", &[], noop_tool(), ToolOptions::default())
            .unwrap();
        assert!(registry.suggest_tool_name("completely_unrelated_xyz").is_none());
    }
}
