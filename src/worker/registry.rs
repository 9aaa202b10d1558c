//! Processor Registry
//!
//! Maps each `EventType` to the processing function that handles it. The
//! pipeline stays generic: what "processing" means (chunking, embedding,
//! purging derived artifacts) is decided by whoever fills the registry.
//!
//! Registration needs `&mut self`; once the registry is wrapped in an `Arc` and
//! handed to the worker pool it is frozen.

use super::types::ProcessingError;
use crate::events::{ChangeEvent, EventType};

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Thread-safe, asynchronous processing function.
pub type ProcessFn = Arc<
    dyn Fn(ChangeEvent) -> Pin<Box<dyn Future<Output = Result<(), ProcessingError>> + Send>>
        + Send
        + Sync,
>;

pub struct ProcessorRegistry {
    processors: HashMap<EventType, ProcessFn>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self {
            processors: HashMap::new(),
        }
    }

    /// Registers `processor` for `event_type`, replacing any previous one.
    pub fn register<F, Fut>(&mut self, event_type: EventType, processor: F)
    where
        F: Fn(ChangeEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ProcessingError>> + Send + 'static,
    {
        // Type-erase the concrete future so different processors share one map.
        let process_fn: ProcessFn = Arc::new(move |event: ChangeEvent| {
            Box::pin(processor(event))
                as Pin<Box<dyn Future<Output = Result<(), ProcessingError>> + Send>>
        });

        self.processors.insert(event_type, process_fn);
        tracing::info!("Registered processor for {} events", event_type);
    }

    /// Registers the same processor for every event type.
    pub fn register_all<F, Fut>(&mut self, processor: F)
    where
        F: Fn(ChangeEvent) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ProcessingError>> + Send + 'static,
    {
        for event_type in EventType::ALL {
            self.register(event_type, processor.clone());
        }
    }

    /// Runs the processor registered for the event's type.
    ///
    /// An event type without a processor is a permanent failure: redelivering it
    /// will not make a processor appear.
    pub async fn execute(&self, event: ChangeEvent) -> Result<(), ProcessingError> {
        match self.processors.get(&event.event_type) {
            Some(process_fn) => {
                tracing::debug!(
                    "Processing {} event for '{}'",
                    event.event_type,
                    event.source_key
                );
                process_fn(event).await
            }
            None => {
                let error = format!("no processor registered for {} events", event.event_type);
                tracing::error!("{}", error);
                Err(ProcessingError::permanent(error))
            }
        }
    }

    pub fn has_processor(&self, event_type: EventType) -> bool {
        self.processors.contains_key(&event_type)
    }

    pub fn processor_count(&self) -> usize {
        self.processors.len()
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
