//! Unit tests for error.rs
//!
//! Tests Error variants, their Display output and the fatal/misuse taxonomy.

use crate::error::{Error, Result};

// ============================================================================
// ERROR DISPLAY TESTS
// ============================================================================

#[test]
fn test_out_of_memory_display_names_allocator() {
    let err = Error::OutOfMemory("allocator 'renderer' cannot fit 4096 bytes".to_string());
    let display = format!("{}", err);
    assert!(display.contains("Out of memory"));
    assert!(display.contains("renderer"));
}

#[test]
fn test_heap_exhausted_display_names_heap() {
    let err = Error::DescriptorHeapExhausted("CbvSrvUav heap (capacity 2)".to_string());
    let display = format!("{}", err);
    assert!(display.contains("Descriptor heap exhausted"));
    assert!(display.contains("CbvSrvUav"));
}

#[test]
fn test_device_lost_display() {
    let err = Error::DeviceLost("driver reset".to_string());
    assert_eq!(format!("{}", err), "Device lost: driver reset");
}

#[test]
fn test_invalid_handle_display() {
    let err = Error::InvalidHandle("wrong heap".to_string());
    assert!(format!("{}", err).contains("Invalid descriptor handle"));
}

// ============================================================================
// TAXONOMY
// ============================================================================

#[test]
fn test_fatal_classification() {
    assert!(Error::OutOfMemory(String::new()).is_fatal());
    assert!(Error::DescriptorHeapExhausted(String::new()).is_fatal());
    assert!(Error::DeviceLost(String::new()).is_fatal());
    assert!(Error::InitializationFailed(String::new()).is_fatal());
    assert!(Error::BackendError(String::new()).is_fatal());

    assert!(!Error::InvalidHandle(String::new()).is_fatal());
    assert!(!Error::InvalidAddress(String::new()).is_fatal());
    assert!(!Error::InvalidState(String::new()).is_fatal());
}

#[test]
fn test_misuse_classification() {
    assert!(Error::InvalidHandle(String::new()).is_misuse());
    assert!(Error::InvalidAddress(String::new()).is_misuse());
    assert!(Error::InvalidArgument(String::new()).is_misuse());
    assert!(Error::InvalidState(String::new()).is_misuse());
    assert!(!Error::DeviceLost(String::new()).is_misuse());
}

// ============================================================================
// MACROS
// ============================================================================

fn bail_with_variant(slot: u32) -> Result<()> {
    crate::engine_bail!("nimbus::test", InvalidHandle, "slot {} already free", slot);
}

fn bail_without_variant() -> Result<()> {
    crate::engine_bail!("nimbus::test", "queue submit failed");
}

#[test]
fn test_engine_bail_with_variant() {
    let err = bail_with_variant(7).unwrap_err();
    assert_eq!(err, Error::InvalidHandle("slot 7 already free".to_string()));
}

#[test]
fn test_engine_bail_defaults_to_backend_error() {
    let err = bail_without_variant().unwrap_err();
    assert_eq!(err, Error::BackendError("queue submit failed".to_string()));
}

#[test]
fn test_error_is_std_error() {
    let err = Error::DeviceLost("x".to_string());
    let _: &dyn std::error::Error = &err;
}

#[test]
fn test_error_clone_eq() {
    let err = Error::InvalidAddress("0x40".to_string());
    assert_eq!(err.clone(), err);
}
