//! Capacity arithmetic shared by nodes and class pools.

use std::ops::{AddAssign, SubAssign};

use crate::error::ResourceError;

/// CPU (MHz shares) and memory (MB) amounts.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Resources {
    pub cpu: f64,
    pub memory: f64,
}

impl Resources {
    pub fn new(cpu: f64, memory: f64) -> Self {
        Self { cpu, memory }
    }
}

impl AddAssign for Resources {
    fn add_assign(&mut self, rhs: Self) {
        self.cpu += rhs.cpu;
        self.memory += rhs.memory;
    }
}

impl SubAssign for Resources {
    fn sub_assign(&mut self, rhs: Self) {
        self.cpu -= rhs.cpu;
        self.memory -= rhs.memory;
    }
}

/// Allocatable versus allocated capacity of a node or a class.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceStats {
    pub allocatable: Resources,
    pub allocated: Resources,
}

impl AddAssign for ResourceStats {
    fn add_assign(&mut self, rhs: Self) {
        self.allocatable += rhs.allocatable;
        self.allocated += rhs.allocated;
    }
}

impl SubAssign for ResourceStats {
    fn sub_assign(&mut self, rhs: Self) {
        self.allocatable -= rhs.allocatable;
        self.allocated -= rhs.allocated;
    }
}

/// Allocated resources as whole percentages of allocatable capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AllocatedStats {
    pub cpu: f64,
    pub memory: f64,
}

/// Percentage of allocatable capacity currently allocated, rounded to the
/// nearest integer, for CPU and memory independently.
pub fn calculate_allocated_percentage_stats(
    stats: &ResourceStats,
) -> Result<AllocatedStats, ResourceError> {
    if stats.allocatable.cpu <= 0.0 || stats.allocatable.memory <= 0.0 {
        return Err(ResourceError::NoCapacity);
    }

    let cpu = stats.allocated.cpu * 100.0 / stats.allocatable.cpu;
    let memory = stats.allocated.memory * 100.0 / stats.allocatable.memory;

    Ok(AllocatedStats {
        cpu: cpu.round(),
        memory: memory.round(),
    })
}
