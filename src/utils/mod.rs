mod seq;

pub use seq::*;
