// SPDX-License-Identifier: CEPL-1.0
//! Named initialization steps. Every step's failure carries its `InitStep` as
//! error context, so callers can tell where bring-up stopped.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitStep {
    LoadVulkan,
    CreateInstance,
    SetupDebugMessenger,
    CreateSurface,
    SelectPhysicalDevice,
    CreateLogicalDevice,
    CreateCommandPool,
    CreateDescriptorSetLayout,
    CreateSwapchain,
    CreateImageViews,
    CreateRenderPass,
    CreateGraphicsPipeline,
    CreateDepthResources,
    CreateFramebuffers,
    LoadTexture,
    CreateSampler,
    LoadModel,
    CreateTransformBuffer,
    CreateDescriptorSets,
    RecordCommandBuffers,
    CreateSyncObjects,
}

impl InitStep {
    pub const ALL: [InitStep; 21] = [
        InitStep::LoadVulkan,
        InitStep::CreateInstance,
        InitStep::SetupDebugMessenger,
        InitStep::CreateSurface,
        InitStep::SelectPhysicalDevice,
        InitStep::CreateLogicalDevice,
        InitStep::CreateCommandPool,
        InitStep::CreateDescriptorSetLayout,
        InitStep::CreateSwapchain,
        InitStep::CreateImageViews,
        InitStep::CreateRenderPass,
        InitStep::CreateGraphicsPipeline,
        InitStep::CreateDepthResources,
        InitStep::CreateFramebuffers,
        InitStep::LoadTexture,
        InitStep::CreateSampler,
        InitStep::LoadModel,
        InitStep::CreateTransformBuffer,
        InitStep::CreateDescriptorSets,
        InitStep::RecordCommandBuffers,
        InitStep::CreateSyncObjects,
    ];

    pub fn name(self) -> &'static str {
        match self {
            InitStep::LoadVulkan => "load_vulkan",
            InitStep::CreateInstance => "create_instance",
            InitStep::SetupDebugMessenger => "setup_debug_messenger",
            InitStep::CreateSurface => "create_surface",
            InitStep::SelectPhysicalDevice => "select_physical_device",
            InitStep::CreateLogicalDevice => "create_logical_device",
            InitStep::CreateCommandPool => "create_command_pool",
            InitStep::CreateDescriptorSetLayout => "create_descriptor_set_layout",
            InitStep::CreateSwapchain => "create_swapchain",
            InitStep::CreateImageViews => "create_image_views",
            InitStep::CreateRenderPass => "create_render_pass",
            InitStep::CreateGraphicsPipeline => "create_graphics_pipeline",
            InitStep::CreateDepthResources => "create_depth_resources",
            InitStep::CreateFramebuffers => "create_framebuffers",
            InitStep::LoadTexture => "load_texture",
            InitStep::CreateSampler => "create_sampler",
            InitStep::LoadModel => "load_model",
            InitStep::CreateTransformBuffer => "create_transform_buffer",
            InitStep::CreateDescriptorSets => "create_descriptor_sets",
            InitStep::RecordCommandBuffers => "record_command_buffers",
            InitStep::CreateSyncObjects => "create_sync_objects",
        }
    }

    /// The step that made `err` fail, if it came out of renderer bring-up.
    pub fn of(err: &anyhow::Error) -> Option<InitStep> {
        err.downcast_ref::<InitStep>().copied()
    }
}

impl fmt::Display for InitStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RenderError;
    use anyhow::{Context, Result};
    use std::cell::RefCell;

    fn bring_up(fail_at: InitStep, ran: &RefCell<Vec<InitStep>>) -> Result<()> {
        for step in InitStep::ALL {
            let outcome: Result<(), RenderError> = if step == fail_at {
                Err(RenderError::NoSuitableDevice { inspected: 2 })
            } else {
                Ok(())
            };
            ran.borrow_mut().push(step);
            outcome.context(step)?;
        }
        Ok(())
    }

    #[test]
    fn test_first_failure_stops_bring_up() {
        let ran = RefCell::new(Vec::new());
        let err = bring_up(InitStep::SelectPhysicalDevice, &ran).unwrap_err();

        assert_eq!(InitStep::of(&err), Some(InitStep::SelectPhysicalDevice));
        assert_eq!(ran.borrow().last(), Some(&InitStep::SelectPhysicalDevice));
        assert!(!ran.borrow().contains(&InitStep::CreateLogicalDevice));

        let root = err.root_cause().downcast_ref::<RenderError>();
        assert!(matches!(root, Some(RenderError::NoSuitableDevice { inspected: 2 })));
        assert!(format!("{err:#}").starts_with("select_physical_device: "));
    }

    #[test]
    fn test_names_are_unique() {
        let mut names: Vec<_> = InitStep::ALL.iter().map(|s| s.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), InitStep::ALL.len());
    }

    #[test]
    fn test_plain_errors_have_no_step() {
        let err = anyhow::anyhow!("unrelated");
        assert_eq!(InitStep::of(&err), None);
    }
}
