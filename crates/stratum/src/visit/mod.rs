//! visitor pattern helpers
mod walk;
pub use walk::Walk;

use crate::error::Result;

/// Visitor that visits its subjects mutably
///
/// `path` is the dotted key path of the subject (`vars.subnets[0]`).
pub trait VisitMut<T: ?Sized> {
    fn visit_mut(&mut self, path: &str, value: &mut T) -> Result<()>;
}

// blanket impl for FnMut
impl<T: ?Sized, F> VisitMut<T> for F
where
    F: FnMut(&str, &mut T) -> Result<()>,
{
    fn visit_mut(&mut self, path: &str, value: &mut T) -> Result<()> {
        self(path, value)
    }
}

/// Visitor that visits its subjects
pub trait Visit<T: ?Sized> {
    fn visit(&mut self, path: &str, value: &T) -> Result<()>;
}

// blanket impl for FnMut
impl<T: ?Sized, F> Visit<T> for F
where
    F: FnMut(&str, &T) -> Result<()>,
{
    fn visit(&mut self, path: &str, value: &T) -> Result<()> {
        self(path, value)
    }
}
