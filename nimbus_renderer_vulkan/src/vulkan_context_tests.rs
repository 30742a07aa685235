use super::*;

#[test]
fn test_device_lost_maps_to_device_lost() {
    let err = vk_error("vkGetSemaphoreCounterValue", vk::Result::ERROR_DEVICE_LOST);
    assert!(matches!(err, Error::DeviceLost(_)));
    assert!(err.is_fatal());
}

#[test]
fn test_out_of_memory_results() {
    assert!(matches!(vk_error("vkAllocateMemory", vk::Result::ERROR_OUT_OF_DEVICE_MEMORY), Error::OutOfMemory(_)));
    assert!(matches!(vk_error("vkCreateBuffer", vk::Result::ERROR_OUT_OF_HOST_MEMORY), Error::OutOfMemory(_)));
}

#[test]
fn test_other_results_are_backend_errors() {
    let err = vk_error("vkQueueSubmit", vk::Result::ERROR_INITIALIZATION_FAILED);
    match err {
        Error::BackendError(msg) => assert!(msg.contains("vkQueueSubmit")),
        other => panic!("unexpected error: {:?}", other),
    }
}
