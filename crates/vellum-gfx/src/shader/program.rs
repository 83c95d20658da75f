use std::collections::HashMap;

use slotmap::new_key_type;

use super::ShaderIr;
use crate::device::{Device, DeviceError, ProgramId, UniformLocation};
use crate::state::StateCache;

new_key_type! {
    /// Handle to a shader registered with [`Graphics`](crate::core::Graphics).
    pub struct ShaderId;
}

/// A shader and its device program.
///
/// The program is compiled on first use. Uniform locations are looked up
/// once per name and then served from a per-program cache; names the
/// program does not declare are cached as `None`.
#[derive(Debug)]
pub struct ShaderProgram {
    ir: ShaderIr,
    program: Option<ProgramId>,
    locations: HashMap<String, Option<UniformLocation>>,
}

impl ShaderProgram {
    pub fn new(ir: ShaderIr) -> Self {
        Self {
            ir,
            program: None,
            locations: HashMap::new(),
        }
    }

    #[inline]
    pub fn ir(&self) -> &ShaderIr {
        &self.ir
    }

    #[inline]
    pub fn program(&self) -> Option<ProgramId> {
        self.program
    }

    pub fn ensure_compiled<D: Device>(
        &mut self,
        cache: &mut StateCache<D>,
    ) -> Result<ProgramId, DeviceError> {
        if let Some(program) = self.program {
            return Ok(program);
        }
        let program = cache.create_program(&self.ir)?;
        log::debug!("compiled program {program:?}");
        self.program = Some(program);
        Ok(program)
    }

    /// Location of uniform `name`, or `None` if the program doesn't declare it.
    pub fn location<D: Device>(
        &mut self,
        cache: &mut StateCache<D>,
        name: &str,
    ) -> Result<Option<UniformLocation>, DeviceError> {
        let program = self.ensure_compiled(cache)?;
        if let Some(&loc) = self.locations.get(name) {
            return Ok(loc);
        }
        let loc = cache.uniform_location(program, name);
        if loc.is_none() {
            log::trace!("program {program:?} has no uniform `{name}`");
        }
        self.locations.insert(name.to_owned(), loc);
        Ok(loc)
    }

    /// Makes this program current and sets `name` to `value`.
    ///
    /// Unknown names are ignored, as GL ignores location `-1`.
    pub fn set_uniform<D: Device>(
        &mut self,
        cache: &mut StateCache<D>,
        name: &str,
        value: &[f32],
    ) -> Result<(), DeviceError> {
        let program = self.ensure_compiled(cache)?;
        if let Some(loc) = self.location(cache, name)? {
            cache.set_uniform(program, loc, value);
        }
        Ok(())
    }

    /// Deletes the device program. The shader recompiles on next use.
    pub fn release<D: Device>(&mut self, cache: &mut StateCache<D>) {
        if let Some(program) = self.program.take() {
            cache.delete_program(program);
        }
        self.locations.clear();
    }

    /// Forgets the device program without deleting it, after context loss.
    pub fn invalidate(&mut self) {
        self.program = None;
        self.locations.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::soft::{Call, SoftDevice};
    use crate::shader::builtin;

    #[test]
    fn compiles_lazily_once() {
        let mut cache = StateCache::new(SoftDevice::new());
        let mut shader = ShaderProgram::new(ShaderIr::fill());
        assert!(shader.program().is_none());

        let a = shader.ensure_compiled(&mut cache).unwrap();
        let b = shader.ensure_compiled(&mut cache).unwrap();
        assert_eq!(a, b);
        assert_eq!(cache.device().calls().count(|c| *c == Call::CreateProgram), 1);
    }

    #[test]
    fn locations_are_queried_once_per_name() {
        let mut cache = StateCache::new(SoftDevice::new());
        let mut shader = ShaderProgram::new(ShaderIr::fill());

        let first = shader.location(&mut cache, ShaderIr::FILL_COLOR).unwrap();
        let second = shader.location(&mut cache, ShaderIr::FILL_COLOR).unwrap();
        assert!(first.is_some());
        assert_eq!(first, second);

        let lookups = cache
            .device()
            .calls()
            .count(|c| matches!(c, Call::UniformLocation(n) if n == ShaderIr::FILL_COLOR));
        assert_eq!(lookups, 1);
    }

    #[test]
    fn missing_uniform_is_cached_as_none() {
        let mut cache = StateCache::new(SoftDevice::new());
        let mut shader = ShaderProgram::new(ShaderIr::textured());

        assert_eq!(shader.location(&mut cache, "nope").unwrap(), None);
        assert_eq!(shader.location(&mut cache, "nope").unwrap(), None);
        let lookups = cache
            .device()
            .calls()
            .count(|c| matches!(c, Call::UniformLocation(_)));
        assert_eq!(lookups, 1);
        assert!(shader.location(&mut cache, builtin::PROJECTION).unwrap().is_some());
    }

    #[test]
    fn invalidate_forces_recompile() {
        let mut cache = StateCache::new(SoftDevice::new());
        let mut shader = ShaderProgram::new(ShaderIr::textured());
        shader.ensure_compiled(&mut cache).unwrap();
        shader.invalidate();
        shader.ensure_compiled(&mut cache).unwrap();
        assert_eq!(cache.device().calls().count(|c| *c == Call::CreateProgram), 2);
    }

    #[test]
    fn release_deletes_program() {
        let mut cache = StateCache::new(SoftDevice::new());
        let mut shader = ShaderProgram::new(ShaderIr::textured());
        shader.ensure_compiled(&mut cache).unwrap();
        shader.release(&mut cache);
        assert_eq!(cache.device().live_programs(), 0);
        assert!(shader.program().is_none());
    }
}
