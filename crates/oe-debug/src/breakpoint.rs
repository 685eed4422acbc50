//! Breakpoint management for debugging

use std::collections::HashMap;

/// A single execution breakpoint
#[derive(Debug, Clone)]
pub struct Breakpoint {
    /// Unique breakpoint ID
    pub id: u32,
    /// Guest address the breakpoint triggers on
    pub address: u32,
    /// Whether the breakpoint is enabled
    pub enabled: bool,
    /// Number of times the breakpoint was triggered
    pub hit_count: u64,
    /// Optional description/label
    pub label: Option<String>,
}

impl Breakpoint {
    pub fn new(id: u32, address: u32) -> Self {
        Self {
            id,
            address,
            enabled: true,
            hit_count: 0,
            label: None,
        }
    }

    /// Set the breakpoint label
    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn record_hit(&mut self) {
        self.hit_count += 1;
    }
}

/// Breakpoint manager
#[derive(Debug, Default)]
pub struct BreakpointManager {
    /// All breakpoints indexed by ID
    breakpoints: HashMap<u32, Breakpoint>,
    /// Breakpoint ids indexed by address for the per-instruction lookup
    by_address: HashMap<u32, u32>,
    next_id: u32,
}

impl BreakpointManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a breakpoint at `address`, returning the id of the existing one
    /// if the address already has a breakpoint
    pub fn add(&mut self, address: u32) -> u32 {
        if let Some(&id) = self.by_address.get(&address) {
            return id;
        }
        let id = self.next_id;
        self.next_id += 1;

        self.by_address.insert(address, id);
        self.breakpoints.insert(id, Breakpoint::new(id, address));

        tracing::debug!(target: "debugger", "Added breakpoint {} at 0x{:08X}", id, address);
        id
    }

    /// Add a labelled breakpoint
    pub fn add_labeled(&mut self, address: u32, label: &str) -> u32 {
        let id = self.add(address);
        if let Some(bp) = self.breakpoints.get_mut(&id) {
            bp.label = Some(label.to_string());
        }
        id
    }

    /// Remove a breakpoint by ID
    pub fn remove(&mut self, id: u32) -> Option<Breakpoint> {
        let bp = self.breakpoints.remove(&id)?;
        self.by_address.remove(&bp.address);
        tracing::debug!(target: "debugger", "Removed breakpoint {} at 0x{:08X}", id, bp.address);
        Some(bp)
    }

    /// Remove the breakpoint at `address`
    pub fn remove_at(&mut self, address: u32) -> Option<Breakpoint> {
        let id = *self.by_address.get(&address)?;
        self.remove(id)
    }

    pub fn enable(&mut self, id: u32) -> bool {
        self.set_enabled(id, true)
    }

    pub fn disable(&mut self, id: u32) -> bool {
        self.set_enabled(id, false)
    }

    fn set_enabled(&mut self, id: u32, enabled: bool) -> bool {
        match self.breakpoints.get_mut(&id) {
            Some(bp) => {
                bp.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Check for an enabled breakpoint at `address`, recording the hit
    pub fn check(&mut self, address: u32) -> Option<&Breakpoint> {
        let id = *self.by_address.get(&address)?;
        let bp = self.breakpoints.get_mut(&id)?;
        if !bp.enabled {
            return None;
        }
        bp.record_hit();
        Some(bp)
    }

    pub fn get(&self, id: u32) -> Option<&Breakpoint> {
        self.breakpoints.get(&id)
    }

    /// All breakpoints sorted by address
    pub fn all(&self) -> Vec<&Breakpoint> {
        let mut all: Vec<_> = self.breakpoints.values().collect();
        all.sort_by_key(|bp| bp.address);
        all
    }

    /// Whether any breakpoint is enabled
    pub fn any_enabled(&self) -> bool {
        self.breakpoints.values().any(|bp| bp.enabled)
    }

    pub fn count(&self) -> usize {
        self.breakpoints.len()
    }

    pub fn clear(&mut self) {
        self.breakpoints.clear();
        self.by_address.clear();
        tracing::debug!(target: "debugger", "Cleared all breakpoints");
    }
}
