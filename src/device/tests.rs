use super::*;

#[test]
fn async_queues_coalesce_onto_their_physical_family() {
    assert_eq!(physical_queue_for(GraphQueue::Graphics), QueueKind::Graphics);
    assert_eq!(physical_queue_for(GraphQueue::AsyncGraphics), QueueKind::Graphics);
    assert_eq!(physical_queue_for(GraphQueue::Compute), QueueKind::Compute);
    assert_eq!(physical_queue_for(GraphQueue::AsyncCompute), QueueKind::Compute);
}

#[test]
fn queue_kinds_cover_every_submission_family_once() {
    assert_eq!(QUEUE_KINDS.len(), 3);
    assert!(QUEUE_KINDS.contains(&QueueKind::Graphics));
    assert!(QUEUE_KINDS.contains(&QueueKind::Compute));
    assert!(QUEUE_KINDS.contains(&QueueKind::Transfer));
    assert!(!QUEUE_KINDS.contains(&QueueKind::Present));
}

#[test]
fn alloc_error_triage_matches_the_vk_result_triage() {
    assert!(matches!(
        map_alloc_error(gpu_alloc::AllocationError::OutOfDeviceMemory),
        Error::OutOfDeviceMemory
    ));
    assert!(matches!(
        map_alloc_error(gpu_alloc::AllocationError::OutOfHostMemory),
        Error::OutOfHostMemory
    ));
    assert!(matches!(
        map_alloc_error(gpu_alloc::AllocationError::TooManyObjects),
        Error::OutOfDeviceMemory
    ));
    assert!(matches!(
        map_alloc_error(gpu_alloc::AllocationError::NoCompatibleMemoryTypes),
        Error::IncompatibleState(_)
    ));
}

#[test]
fn fresh_queue_submission_carries_no_work() {
    let sub = QueueSubmission::default();
    assert!(sub.command_buffers.is_empty());
    assert!(sub.wait_semaphores.is_empty());
    assert!(sub.wait_stages.is_empty());
    assert!(sub.signal_semaphores.is_empty());
}
