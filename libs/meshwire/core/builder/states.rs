//! Type-state markers for the builder pattern
//!
//! These types track at compile time whether the server address has been
//! set, so `build()` only exists once it has.

/// Marker trait for address state
pub trait AddressState {}

/// Address has not been set
pub struct NoAddress;
impl AddressState for NoAddress {}

/// Address has been set (directly or through a loaded `ClientConfig`)
pub struct HasAddress;
impl AddressState for HasAddress {}
