//! Kinematic transform state
//!
//! Holds the virtual axes and the book-keeping that keeps them consistent
//! with the physical axes they drive. Virtual positions go stale whenever
//! a fed physical axis moves on its own (homing, clamping, aborts) and are
//! recomputed lazily from the physical requested positions.

use crate::kinematics::{self, Kinematics};
use crate::splitter::Splitter;
use printkit_core::{ConfigError, Result};
use printkit_settings::{AxisSettings, TransformSettings, VirtualAxisSettings};

/// An axis of kinematic space
#[derive(Debug, Clone)]
pub struct VirtualAxis {
    settings: VirtualAxisSettings,
    req_pos: f64,
    old_pos: f64,
    delta: f64,
    relative: bool,
}

impl VirtualAxis {
    fn new(settings: VirtualAxisSettings) -> Self {
        Self {
            settings,
            req_pos: 0.0,
            old_pos: 0.0,
            delta: 0.0,
            relative: false,
        }
    }

    pub fn name(&self) -> char {
        self.settings.name
    }

    pub fn settings(&self) -> &VirtualAxisSettings {
        &self.settings
    }

    pub fn req_pos(&self) -> f64 {
        self.req_pos
    }

    pub fn old_pos(&self) -> f64 {
        self.old_pos
    }

    pub fn is_relative(&self) -> bool {
        self.relative
    }

    pub(crate) fn set_relative(&mut self, relative: bool) {
        self.relative = relative;
    }

    pub(crate) fn set_req_pos(&mut self, value: f64) {
        self.req_pos = value;
    }

    pub(crate) fn begin_move(&mut self) {
        self.old_pos = self.req_pos;
    }

    /// Freeze the distance of the move being split
    pub(crate) fn compute_delta(&mut self) -> f64 {
        self.delta = self.req_pos - self.old_pos;
        self.delta
    }

    pub(crate) fn interpolate(&self, frac: f64) -> f64 {
        self.old_pos + frac * self.delta
    }
}

/// Virtual axes plus their link to the physical axes
pub struct Transform {
    settings: TransformSettings,
    kinematics: Box<dyn Kinematics>,
    virt: Vec<VirtualAxis>,
    phys_index: Vec<usize>,
    secondary: Vec<usize>,
    splitter: Option<Splitter>,
    splitting: bool,
    virt_update_pending: bool,
    splitclear_pending: bool,
}

impl Transform {
    /// Resolve the transform against the configured physical axes
    pub fn new(settings: TransformSettings, axes: &[AxisSettings]) -> Result<Self> {
        let kinematics = kinematics::from_settings(&settings.kinematics);
        if kinematics.num_axes() != settings.virtual_axes.len()
            || settings.virtual_axes.len() != settings.physical_axes.len()
        {
            return Err(ConfigError::InvalidValue {
                key: "transform.virtual_axes".to_string(),
                reason: format!("kinematics needs {} axes", kinematics.num_axes()),
            }
            .into());
        }

        let mut phys_index = Vec::with_capacity(settings.physical_axes.len());
        for name in &settings.physical_axes {
            let index = axes
                .iter()
                .position(|a| a.name == *name)
                .ok_or(ConfigError::UnknownAxis(*name))?;
            phys_index.push(index);
        }
        let secondary = (0..axes.len()).filter(|i| !phys_index.contains(i)).collect();
        let virt = settings
            .virtual_axes
            .iter()
            .cloned()
            .map(VirtualAxis::new)
            .collect();

        Ok(Self {
            settings,
            kinematics,
            virt,
            phys_index,
            secondary,
            splitter: None,
            splitting: false,
            virt_update_pending: true,
            splitclear_pending: false,
        })
    }

    pub fn settings(&self) -> &TransformSettings {
        &self.settings
    }

    pub fn kinematics(&self) -> &dyn Kinematics {
        self.kinematics.as_ref()
    }

    pub fn virtual_axes(&self) -> &[VirtualAxis] {
        &self.virt
    }

    pub(crate) fn virtual_axes_mut(&mut self) -> &mut [VirtualAxis] {
        &mut self.virt
    }

    /// Physical axis index of each transform axis
    pub fn phys_index(&self) -> &[usize] {
        &self.phys_index
    }

    /// Physical axes outside the transform, interpolated linearly while
    /// splitting
    pub fn secondary(&self) -> &[usize] {
        &self.secondary
    }

    /// Whether physical axis `index` feeds the transform
    pub fn feeds(&self, index: usize) -> bool {
        self.phys_index.contains(&index)
    }

    pub fn find_virtual(&self, name: char) -> Option<usize> {
        self.virt.iter().position(|v| v.name() == name)
    }

    /// A virtual move is being built or split
    pub fn is_splitting(&self) -> bool {
        self.splitting
    }

    pub(crate) fn set_splitting(&mut self) {
        self.splitting = true;
    }

    pub fn is_virt_update_pending(&self) -> bool {
        self.virt_update_pending
    }

    pub(crate) fn mark_stale(&mut self) {
        self.virt_update_pending = true;
    }

    pub(crate) fn take_stale(&mut self) -> bool {
        std::mem::replace(&mut self.virt_update_pending, false)
    }

    pub(crate) fn start_splitter(&mut self, splitter: Splitter) {
        tracing::debug!(segments = splitter.count(), "split started");
        self.splitter = Some(splitter);
    }

    pub(crate) fn splitter_mut(&mut self) -> Option<&mut Splitter> {
        self.splitter.as_mut()
    }

    /// Drop the splitter after its final segment or an abort
    pub(crate) fn end_split(&mut self) {
        if let Some(splitter) = self.splitter.take() {
            tracing::debug!(
                submitted = splitter.position(),
                total = splitter.count(),
                "split finished"
            );
        }
        self.splitting = false;
    }

    pub fn is_splitclear_pending(&self) -> bool {
        self.splitclear_pending
    }

    pub(crate) fn set_splitclear_pending(&mut self) {
        assert!(!self.splitclear_pending, "split-clear already pending");
        self.splitclear_pending = true;
    }

    pub(crate) fn take_splitclear_pending(&mut self) -> bool {
        std::mem::replace(&mut self.splitclear_pending, false)
    }

    /// Physical positions of the transform axes for virtual positions
    pub fn virt_to_phys(&self, virt: &[f64]) -> Vec<f64> {
        let mut phys = vec![0.0; self.phys_index.len()];
        self.kinematics.virt_to_phys(virt, &mut phys);
        phys
    }

    /// Overwrite virtual requested positions from physical ones
    pub(crate) fn update_virt_from_phys(&mut self, phys: &[f64]) {
        let mut virt = vec![0.0; self.virt.len()];
        self.kinematics.phys_to_virt(phys, &mut virt);
        for (axis, value) in self.virt.iter_mut().zip(virt) {
            axis.req_pos = value;
        }
    }

    pub(crate) fn virt_req_positions(&self) -> Vec<f64> {
        self.virt.iter().map(|v| v.req_pos).collect()
    }
}

impl std::fmt::Debug for Transform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transform")
            .field("virt", &self.virt)
            .field("phys_index", &self.phys_index)
            .field("splitting", &self.splitting)
            .field("virt_update_pending", &self.virt_update_pending)
            .finish()
    }
}
