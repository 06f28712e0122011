//! Barrier, split-event, and semaphore synthesis (bake step 7).

use ash::vk;

use super::pass::PassId;
use super::resource::ResourceId;

/// How a resource transition between a producer and a consumer pass is
/// realized. Preference order, as in §4.6 step 7: intra-queue barrier,
/// then split event, then cross-queue semaphore.
#[derive(Debug, Clone)]
pub enum SyncOp {
    /// Inserted immediately before the consumer; producer and consumer
    /// share a queue and no other physical pass intervenes.
    PipelineBarrier {
        resource: ResourceId,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        before_pass: PassId,
    },
    /// Set right after the producer, waited on right before the consumer;
    /// used when useful work lies between them on the same queue.
    SplitEvent {
        resource: ResourceId,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        set_after_pass: PassId,
        wait_before_pass: PassId,
    },
    /// Used when the producer and consumer are on different queues.
    Semaphore {
        resource: ResourceId,
        signal_pass: PassId,
        wait_pass: PassId,
        dst_stage: vk::PipelineStageFlags,
    },
}

impl SyncOp {
    pub fn resource(&self) -> ResourceId {
        match self {
            SyncOp::PipelineBarrier { resource, .. }
            | SyncOp::SplitEvent { resource, .. }
            | SyncOp::Semaphore { resource, .. } => *resource,
        }
    }
}

/// Chooses which synchronization primitive to use for one producer→
/// consumer transition, given whether the two passes share a queue and
/// whether intervening physical passes exist between them.
pub fn choose_sync_op(
    resource: ResourceId,
    producer: PassId,
    producer_queue_differs: bool,
    consumer: PassId,
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
    src_stage: vk::PipelineStageFlags,
    dst_stage: vk::PipelineStageFlags,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    intervening_work: bool,
) -> SyncOp {
    if producer_queue_differs {
        return SyncOp::Semaphore {
            resource,
            signal_pass: producer,
            wait_pass: consumer,
            dst_stage,
        };
    }

    if intervening_work {
        SyncOp::SplitEvent {
            resource,
            src_access,
            dst_access,
            src_stage,
            dst_stage,
            old_layout,
            new_layout,
            set_after_pass: producer,
            wait_before_pass: consumer,
        }
    } else {
        SyncOp::PipelineBarrier {
            resource,
            src_access,
            dst_access,
            src_stage,
            dst_stage,
            old_layout,
            new_layout,
            before_pass: consumer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sid_vec::FromIndex;

    #[test]
    fn cross_queue_transition_always_picks_semaphore() {
        let r: ResourceId = FromIndex::from_index(0);
        let p: PassId = FromIndex::from_index(0);
        let c: PassId = FromIndex::from_index(1);
        let op = choose_sync_op(
            r,
            p,
            true,
            c,
            vk::AccessFlags::SHADER_WRITE,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            false,
        );
        assert!(matches!(op, SyncOp::Semaphore { .. }));
    }

    #[test]
    fn same_queue_no_intervening_work_picks_barrier() {
        let r: ResourceId = FromIndex::from_index(0);
        let p: PassId = FromIndex::from_index(0);
        let c: PassId = FromIndex::from_index(1);
        let op = choose_sync_op(
            r,
            p,
            false,
            c,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            false,
        );
        assert!(matches!(op, SyncOp::PipelineBarrier { .. }));
    }
}
