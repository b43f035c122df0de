pub mod phase;
pub mod timebase;
pub mod vec3;
