//! The unit of output from the [parser][crate::parser]

use serde::{Deserialize, Serialize};

use crate::constants::{LIVE_EVENT, MESSAGE_EVENT};

/// One complete SSE block: its event name and its joined `data:` lines
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    pub data: String,
}

impl Frame {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }

    /// Frame with the default `message` event name
    pub fn message(data: impl Into<String>) -> Self {
        Self::new(MESSAGE_EVENT, data)
    }

    /// Whether this is a telemetry frame worth decoding
    pub fn is_live(&self) -> bool {
        self.event == LIVE_EVENT && !self.data.is_empty()
    }
}
