//! Host request/response plumbing.
//!
//! The module is organised around the correlation-id [`Correlator`] and the
//! [`wire`] format of the shared channel it demultiplexes. Everything the
//! editor asks of its host (save, export, generate, refine, clear,
//! list-models) flows through one [`Correlator`] instance.

pub mod correlator;
pub mod wire;

pub use correlator::{ChannelError, Correlator, RequestEvent, RequestHandle, Resolution};
pub use wire::{
    CorrelationId, FailurePayload, InboundEnvelope, ModelInfo, OutboundEnvelope, ProviderModels,
    ReasoningEffort, RefineClarification, RefineOptions, RefinePayload, RefineSuccess,
    ReplyPayload, RequestKind, RequestPayload, ScopeDescriptor, refine_client_budget,
};
