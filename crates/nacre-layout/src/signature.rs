//! Function signature descriptions

use crate::layout::Layout;

/// The shape of a native function: argument layouts, optional return layout,
/// and whether the function accepts variadic arguments.
///
/// For a variadic signature, `args` may include the actual variadic arguments
/// of a particular call after the fixed ones; `fixed` records where the fixed
/// portion ends so call preparation can distinguish the two.
///
/// Signatures are immutable and hashable; calling sequences are cached keyed
/// by `(Abi, FunctionSignature)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionSignature {
    ret: Option<Layout>,
    args: Vec<Layout>,
    fixed: Option<usize>,
}

impl FunctionSignature {
    /// A signature returning `ret` (None = void) with the given arguments
    pub fn new(ret: Option<Layout>, args: Vec<Layout>) -> Self {
        Self {
            ret,
            args,
            fixed: None,
        }
    }

    /// Mark this signature variadic with every declared argument fixed,
    /// consuming and returning it
    pub fn variadic(self) -> Self {
        let n = self.args.len();
        self.variadic_after(n)
    }

    /// Mark this signature variadic with the first `fixed` arguments fixed;
    /// the rest describe the variadic actuals of one call
    pub fn variadic_after(mut self, fixed: usize) -> Self {
        self.fixed = Some(fixed.min(self.args.len()));
        self
    }

    /// The return layout, if the function returns a value
    pub fn return_layout(&self) -> Option<&Layout> {
        self.ret.as_ref()
    }

    /// Argument layouts in declaration order, variadic actuals included
    pub fn argument_layouts(&self) -> &[Layout] {
        &self.args
    }

    /// How many leading arguments are fixed (all of them when non-variadic)
    pub fn fixed_argument_count(&self) -> usize {
        self.fixed.unwrap_or(self.args.len())
    }

    /// Whether the function accepts variadic arguments
    pub fn is_variadic(&self) -> bool {
        self.fixed.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_accessors() {
        let sig = FunctionSignature::new(Some(Layout::int(32)), vec![Layout::pointer()]);
        assert_eq!(sig.return_layout(), Some(&Layout::int(32)));
        assert_eq!(sig.argument_layouts().len(), 1);
        assert!(!sig.is_variadic());
        assert_eq!(sig.fixed_argument_count(), 1);
        assert!(sig.clone().variadic().is_variadic());
    }

    #[test]
    fn test_fixed_argument_split() {
        let sig = FunctionSignature::new(
            Some(Layout::int(32)),
            vec![Layout::pointer(), Layout::int(32), Layout::float(64)],
        )
        .variadic_after(1);
        assert!(sig.is_variadic());
        assert_eq!(sig.fixed_argument_count(), 1);
        assert_eq!(sig.argument_layouts().len(), 3);

        let all_fixed = FunctionSignature::new(None, vec![Layout::pointer()]).variadic();
        assert_eq!(all_fixed.fixed_argument_count(), 1);
    }
}
