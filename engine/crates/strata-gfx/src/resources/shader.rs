use std::ffi::CString;

use ash::vk;
use itertools::Itertools;

use crate::{
    error::{GfxError, GfxResult, VkResultExt},
    gfx_core::GfxCore,
};

/// 单个阶段的 SPIR-V 字节码与入口函数
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderStageDesc {
    pub spirv: Vec<u8>,
    pub entry_point: String,
}
impl ShaderStageDesc {
    pub fn new(spirv: impl Into<Vec<u8>>, entry_point: impl Into<String>) -> Self {
        Self {
            spirv: spirv.into(),
            entry_point: entry_point.into(),
        }
    }
}

/// 一个完整的 shader program；tessellation 的两个阶段必须同时存在
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShaderDesc {
    pub vertex: Option<ShaderStageDesc>,
    pub tessellation_control: Option<ShaderStageDesc>,
    pub tessellation_evaluation: Option<ShaderStageDesc>,
    pub geometry: Option<ShaderStageDesc>,
    pub fragment: Option<ShaderStageDesc>,
}

impl ShaderDesc {
    pub fn new(vertex: ShaderStageDesc, fragment: ShaderStageDesc) -> Self {
        Self {
            vertex: Some(vertex),
            fragment: Some(fragment),
            ..Default::default()
        }
    }

    /// 按管线顺序列出所有存在的阶段
    pub fn stages(&self) -> Vec<(vk::ShaderStageFlags, &ShaderStageDesc)> {
        [
            (vk::ShaderStageFlags::VERTEX, &self.vertex),
            (vk::ShaderStageFlags::TESSELLATION_CONTROL, &self.tessellation_control),
            (vk::ShaderStageFlags::TESSELLATION_EVALUATION, &self.tessellation_evaluation),
            (vk::ShaderStageFlags::GEOMETRY, &self.geometry),
            (vk::ShaderStageFlags::FRAGMENT, &self.fragment),
        ]
        .into_iter()
        .filter_map(|(stage, desc)| desc.as_ref().map(|desc| (stage, desc)))
        .collect_vec()
    }

    /// # params
    /// - `tessellation` / `geometry`: device 是否开启了对应的 feature
    pub fn validate(&self, tessellation: bool, geometry: bool) -> GfxResult<()> {
        if self.vertex.is_none() || self.fragment.is_none() {
            return Err(GfxError::UnsupportedUsage("shader program needs vertex and fragment stages".to_string()));
        }
        match (&self.tessellation_control, &self.tessellation_evaluation) {
            (Some(_), None) | (None, Some(_)) => {
                return Err(GfxError::UnsupportedUsage(
                    "tessellation control and evaluation stages must be given together".to_string(),
                ));
            }
            (Some(_), Some(_)) if !tessellation => {
                return Err(GfxError::UnsupportedUsage("device does not support tessellation shaders".to_string()));
            }
            _ => (),
        }
        if self.geometry.is_some() && !geometry {
            return Err(GfxError::UnsupportedUsage("device does not support geometry shaders".to_string()));
        }
        Ok(())
    }
}

struct ShaderStageModule {
    stage: vk::ShaderStageFlags,
    module: vk::ShaderModule,
    entry_point: CString,
}

/// # Destroy
///
/// 需要手动调用 `destroy` 方法来释放所有 shader module
pub struct GfxShaderProgram {
    stages: Vec<ShaderStageModule>,
}

// new & init
impl GfxShaderProgram {
    pub fn new(core: &GfxCore, desc: &ShaderDesc, name: &str) -> GfxResult<Self> {
        let features = &core.physical_device.features;
        desc.validate(features.tessellation_shader == vk::TRUE, features.geometry_shader == vk::TRUE)?;

        let mut program = Self { stages: Vec::new() };
        for (stage, stage_desc) in desc.stages() {
            match Self::create_module(core, stage, stage_desc, name) {
                Ok(module) => program.stages.push(module),
                Err(e) => {
                    program.destroy(core);
                    return Err(e);
                }
            }
        }
        Ok(program)
    }

    fn create_module(
        core: &GfxCore,
        stage: vk::ShaderStageFlags,
        desc: &ShaderStageDesc,
        name: &str,
    ) -> GfxResult<ShaderStageModule> {
        let code = ash::util::read_spv(&mut std::io::Cursor::new(&desc.spirv))
            .map_err(|e| GfxError::UnsupportedUsage(format!("invalid SPIR-V for {stage:?} of {name}: {e}")))?;
        let entry_point = CString::new(desc.entry_point.as_str())
            .map_err(|_| GfxError::UnsupportedUsage(format!("invalid entry point {:?}", desc.entry_point)))?;

        let module_ci = vk::ShaderModuleCreateInfo::default().code(&code);
        let module =
            unsafe { core.device.create_shader_module(&module_ci, None) }.or_session_failed("create_shader_module")?;
        core.device.set_object_debug_name(module, format!("GfxShaderModule::{name}-{stage:?}"));

        Ok(ShaderStageModule {
            stage,
            module,
            entry_point,
        })
    }
}

// getters
impl GfxShaderProgram {
    /// 创建 pipeline 时使用，借用 program 内部的入口函数名
    pub fn stage_create_infos(&self) -> Vec<vk::PipelineShaderStageCreateInfo<'_>> {
        self.stages
            .iter()
            .map(|s| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(s.stage)
                    .module(s.module)
                    .name(s.entry_point.as_c_str())
            })
            .collect_vec()
    }

    #[inline]
    pub fn stage_flags(&self) -> vk::ShaderStageFlags {
        self.stages.iter().fold(vk::ShaderStageFlags::empty(), |acc, s| acc | s.stage)
    }
}

// destroy
impl GfxShaderProgram {
    pub fn destroy(self, core: &GfxCore) {
        for stage in self.stages {
            unsafe { core.device.destroy_shader_module(stage.module, None) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage() -> ShaderStageDesc {
        ShaderStageDesc::new(vec![0u8; 4], "main")
    }

    #[test]
    fn test_stage_order() {
        let desc = ShaderDesc {
            geometry: Some(stage()),
            ..ShaderDesc::new(stage(), stage())
        };
        let stages = desc.stages().into_iter().map(|(s, _)| s).collect_vec();
        assert_eq!(
            stages,
            vec![vk::ShaderStageFlags::VERTEX, vk::ShaderStageFlags::GEOMETRY, vk::ShaderStageFlags::FRAGMENT]
        );
    }

    #[test]
    fn test_validation() {
        assert!(ShaderDesc::new(stage(), stage()).validate(false, false).is_ok());
        assert!(ShaderDesc::default().validate(true, true).is_err());

        let half_tess = ShaderDesc {
            tessellation_control: Some(stage()),
            ..ShaderDesc::new(stage(), stage())
        };
        assert!(half_tess.validate(true, true).is_err());

        let tess = ShaderDesc {
            tessellation_evaluation: Some(stage()),
            ..half_tess
        };
        assert!(tess.validate(true, false).is_ok());
        assert!(tess.validate(false, false).is_err());

        let geom = ShaderDesc {
            geometry: Some(stage()),
            ..ShaderDesc::new(stage(), stage())
        };
        assert!(matches!(geom.validate(true, false), Err(GfxError::UnsupportedUsage(_))));
    }
}
