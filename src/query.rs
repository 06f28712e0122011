//! Timestamp query pools.
//!
//! One `QueryPool` is sized lazily per command buffer. Writes during
//! recording return a `QueryResult` cookie; `Device::read_query_results`
//! resolves the batch at the frame boundary once the owning fence has been
//! waited on.

use ash::vk;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryResult(pub(crate) u32);

pub struct QueryPool {
    raw: vk::QueryPool,
    capacity: u32,
    cursor: u32,
}

impl QueryPool {
    pub fn new(device: &ash::Device, capacity: u32) -> Result<QueryPool, Error> {
        let info = vk::QueryPoolCreateInfo::builder()
            .query_type(vk::QueryType::TIMESTAMP)
            .query_count(capacity);
        let raw = unsafe { device.create_query_pool(&info, None).map_err(Error::from)? };
        Ok(QueryPool {
            raw,
            capacity,
            cursor: 0,
        })
    }

    pub fn raw(&self) -> vk::QueryPool {
        self.raw
    }

    /// Reserves the next slot for a timestamp write, growing the pool's
    /// logical cursor. Panics if the pool is exhausted; callers size pools
    /// generously since they're cheap and per-command-buffer.
    pub fn reserve(&mut self) -> QueryResult {
        assert!(
            self.cursor < self.capacity,
            "query pool exhausted: capacity {}",
            self.capacity
        );
        let slot = self.cursor;
        self.cursor += 1;
        QueryResult(slot)
    }

    pub fn reset(&mut self, device: &ash::Device, cmd: vk::CommandBuffer) {
        unsafe { device.cmd_reset_query_pool(cmd, self.raw, 0, self.capacity) };
        self.cursor = 0;
    }

    /// Reads back every reserved slot as nanoseconds, using the physical
    /// device's `timestamp_period`. Must only be called once the command
    /// buffer's fence has signalled.
    pub fn resolve_all(
        &self,
        device: &ash::Device,
        timestamp_period: f32,
    ) -> Result<Vec<u64>, Error> {
        if self.cursor == 0 {
            return Ok(Vec::new());
        }
        let mut raw_values = vec![0u64; self.cursor as usize];
        unsafe {
            device
                .get_query_pool_results(
                    self.raw,
                    0,
                    &mut raw_values,
                    vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT,
                )
                .map_err(Error::from)?;
        }
        Ok(raw_values
            .into_iter()
            .map(|ticks| (ticks as f64 * timestamp_period as f64) as u64)
            .collect())
    }

    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_query_pool(self.raw, None);
    }
}
