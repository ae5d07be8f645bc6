//! Kernels wrapping a plain loop body.
//!
//! Each thread executes the body exactly once for its own global index;
//! threads outside the iteration space do nothing.

use super::kernel::{Kernel, ThreadBlock, ThreadIndex};

pub struct Lambda<P> {
    pub params: P,
    pub body: fn(&P, usize),
    pub len: usize,
}

#[async_trait::async_trait]
impl<P> Kernel for Lambda<P>
where
    P: Send + Sync,
{
    type Error = std::convert::Infallible;

    async fn run(&self, _block: &ThreadBlock, tid: &ThreadIndex) -> Result<(), Self::Error> {
        let i = tid.global_x();
        if i < self.len {
            (self.body)(&self.params, i);
        }
        Ok(())
    }

    fn name(&self) -> Option<&str> {
        Some("lambda")
    }
}

/// Two-dimensional body where `y` maps to rows and `x` maps to columns.
pub struct Lambda2d<P> {
    pub params: P,
    pub body: fn(&P, usize, usize),
    pub rows: usize,
    pub cols: usize,
}

#[async_trait::async_trait]
impl<P> Kernel for Lambda2d<P>
where
    P: Send + Sync,
{
    type Error = std::convert::Infallible;

    async fn run(&self, _block: &ThreadBlock, tid: &ThreadIndex) -> Result<(), Self::Error> {
        let i = tid.global_y();
        let j = tid.global_x();
        if i < self.rows && j < self.cols {
            (self.body)(&self.params, i, j);
        }
        Ok(())
    }

    fn name(&self) -> Option<&str> {
        Some("lambda_2d")
    }
}
