//! Breath-timed control: clock reference, gate state machine, mix policy and poses.
//! Everything here is advanced by the tick context only.

pub mod clock;
pub mod gate;
pub mod mix;
pub mod phrase;
pub mod source;
pub mod spatial;

pub use clock::{ClockReference, ExternalSample, NOMINAL_BREATH_SEC};
pub use gate::{BreathEvent, GateMachine, GateParams, GatePhase, GateState};
pub use mix::{MixPolicy, MixSmoother, MixState, MixTargets, WET_CAP};
pub use phrase::Phrase;
pub use source::{BreathTimeSource, ClockError, NoBreathClock, SystemBreathClock};
