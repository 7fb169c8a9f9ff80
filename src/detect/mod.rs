//! Motion detection: background model, motion mask and the debounce/cooldown state
//! machine that turns frames into `MotionEvent`s.

mod background;
mod evaluator;
mod events;
pub mod mask;

pub use background::BackgroundModel;
pub use evaluator::{Activity, MotionEvaluator};
pub use events::{EventPayload, MotionEvent, MotionEvents, DEFAULT_IDLE};
