/// Heights of the checker's scope stacks at some point, so a failed
/// instantiation can unwind everything it pushed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ScopeMark {
    pub values: usize,
    pub types: usize,
    pub templates: usize,
    pub loop_depth: u32,
}

/// The scope one instantiation declares its locals in.
///
/// Lookups fall through to the enclosing scopes, but nothing declared here
/// outlives the instantiation: the next index starts from the same mark.
#[derive(Debug)]
pub struct LocalInstantiationScope {
    pub(crate) mark: ScopeMark,
    introduced: Vec<String>,
}

impl LocalInstantiationScope {
    pub(crate) fn new(mark: ScopeMark) -> Self {
        LocalInstantiationScope {
            mark,
            introduced: Vec::new(),
        }
    }

    pub(crate) fn record(&mut self, name: &str) {
        self.introduced.push(name.to_string());
    }

    /// Names declared by this instantiation, in declaration order.
    pub fn introduced(&self) -> &[String] {
        &self.introduced
    }
}
