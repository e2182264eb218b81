// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! LLM module for Warden
//!
//! One canonical request/event model over ten vendor wire formats, plus the
//! transport, registry and model listing around it.

pub mod decoder;
pub mod message;
pub mod mock_transport;
pub mod models;
pub mod provider;
pub mod providers;
pub mod reasoning;
pub mod registry;
pub mod retry;
pub mod transport;

pub use decoder::{DecoderState, Frame, FrameReader, Framing, FramingError};
pub use message::*;
pub use models::{ModelCatalog, ModelLister};
pub use provider::*;
pub use reasoning::{GenerationSettings, ReasoningControl, ReasoningEffort};
pub use registry::AdapterRegistry;
pub use transport::{ByteStream, HttpTransport, Transport, TransportResponse};
