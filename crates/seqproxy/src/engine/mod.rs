//! Match-and-forward engine.
//!
//! The engine owns the plan cursor. Each inbound request consumes exactly one
//! assertion, in order: the request is checked against it, forwarded to the
//! target, and the target's raw response is relayed back over the taken-over
//! connection. Access is serialized by a single async mutex held for the
//! whole match-and-forward, so concurrent connections still consume
//! assertions one at a time.

mod cursor;
mod matcher;

pub use cursor::Cursor;
pub use matcher::verify;

use crate::config::TestPlan;
use crate::error::HarnessError;
use crate::lifecycle::{Phase, PhaseTracker};
use crate::proxy::{forward_request, RawResponseWriter};
use bytes::Bytes;
use hyper::Request;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// What a successfully handled request did to the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// The assertion passed and more remain.
    Advanced { passed: usize, total: usize },
    /// The last assertion passed; the plan is complete.
    Exhausted { total: usize },
}

/// Plan cursor plus the match-and-forward step for a single run.
pub struct Engine {
    plan: Arc<TestPlan>,
    cursor: Mutex<Cursor>,
    phase: PhaseTracker,
}

impl Engine {
    /// Start at the first assertion of `plan`, reporting progress to `phase`.
    pub fn new(plan: Arc<TestPlan>, phase: PhaseTracker) -> Self {
        let cursor = Cursor::new(plan.len());
        Self {
            plan,
            cursor: Mutex::new(cursor),
            phase,
        }
    }

    /// Number of assertions consumed so far.
    pub async fn consumed(&self) -> usize {
        self.cursor.lock().await.consumed()
    }

    /// Match `request` against the next assertion, forward it and relay the
    /// target's response through `writer`.
    ///
    /// The cursor advances before any check, so a failure still counts as
    /// the Nth test attempted.
    pub async fn handle(
        &self,
        request: Request<Bytes>,
        writer: Option<&dyn RawResponseWriter>,
    ) -> Result<Progress, HarnessError> {
        let mut cursor = self.cursor.lock().await;
        let index = cursor.advance()?;
        self.phase.advance(Phase::Running);

        info!("running test {}", index);
        let assertion =
            self.plan
                .assertions
                .get(index)
                .ok_or(HarnessError::PlanExhausted {
                    total: cursor.total(),
                    received: index + 1,
                })?;
        verify(index, assertion, request.uri().path(), request.headers())?;

        let response = forward_request(self.plan.target_port, request).await?;

        let writer = writer.ok_or(HarnessError::TakeoverUnsupported)?;
        writer
            .write_raw(&response.bytes)
            .await
            .map_err(HarnessError::ResponseRelay)?;

        let total = cursor.total();
        info!("passed {}/{}", cursor.consumed(), total);
        if cursor.is_exhausted() {
            Ok(Progress::Exhausted { total })
        } else {
            Ok(Progress::Advanced {
                passed: cursor.consumed(),
                total,
            })
        }
    }
}
