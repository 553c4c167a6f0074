//! `head`: the first `limit` events.

use serde::{Deserialize, Serialize};
use sluice_core::types::EventBatch;

use crate::adapter::{Describe, Stream, StreamFn};
use crate::control::ControlHandle;
use crate::error::OpError;
use crate::registry::{OperatorSpec, Registry};
use crate::stream::Generator;
use crate::traits::BoxedOperator;

fn default_limit() -> u64 {
    10
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Head {
    #[serde(default = "default_limit")]
    pub limit: u64,
}

impl Head {
    pub fn boxed(limit: u64) -> BoxedOperator {
        Stream::boxed(Self { limit })
    }
}

// Order-sensitive and filter-sensitive: keeps the default rewrite.
impl Describe for Head {
    fn name(&self) -> String {
        "head".into()
    }

    fn config(&self) -> Result<serde_json::Value, OpError> {
        Ok(serde_json::to_value(self).map_err(sluice_core::error::Error::from)?)
    }
}

impl StreamFn for Head {
    type Input = EventBatch;
    type Output = EventBatch;

    fn transform(
        &self,
        mut input: Generator<EventBatch>,
        _ctrl: ControlHandle,
    ) -> Result<Generator<EventBatch>, OpError> {
        let mut remaining = self.limit;
        Ok(Box::new(std::iter::from_fn(move || {
            // Stop pulling as soon as the limit is reached.
            if remaining == 0 {
                return None;
            }
            let batch = input.next()?;
            let take = (batch.rows() as u64).min(remaining);
            remaining -= take;
            if take as usize == batch.rows() {
                Some(batch)
            } else {
                Some(batch.slice(0, take as usize))
            }
        })))
    }
}

pub(crate) fn register(registry: &mut Registry) {
    registry.register("head", |spec: &OperatorSpec| {
        Ok(Head::boxed(spec.parse::<Head>()?.limit))
    });
}
