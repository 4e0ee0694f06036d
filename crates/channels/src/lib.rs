//! Channel-side policy and plumbing: allowlist gating, group activation,
//! directive parsing, body normalization, plugin traits, and outbound
//! chunking.

pub mod chunk;
pub mod directives;
pub mod gating;
pub mod normalize;
pub mod plugin;
pub mod registry;

pub use {
    directives::{Directive, ParsedMessage, QueueDirective},
    gating::{GroupDecision, is_allowed},
    plugin::{ChannelHealth, ChannelOutbound, ChannelPlugin, InboundSink},
    registry::ChannelRegistry,
};
