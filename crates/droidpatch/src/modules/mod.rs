use crate::error::Result;
use crate::executor::ExecCtx;
use crate::requirements::ResourceRequirement;
use crate::resources::PreparedResources;

pub mod debug;
pub mod util;

/// A unit of customization the host runs against prepared partitions.
///
/// `requirements` is pure and is read before anything is prepared; the host
/// then calls `inject` at most once with borrows of exactly the declared
/// resources it could produce.
pub trait Module {
    fn id(&self) -> &'static str;
    fn requirements(&self) -> ResourceRequirement;
    fn inject(&self, res: &mut PreparedResources<'_>, ctx: &mut ExecCtx) -> Result<()>;
}

pub fn builtin_modules() -> Vec<Box<dyn Module>> {
    vec![Box::new(debug::DebugModule)]
}
