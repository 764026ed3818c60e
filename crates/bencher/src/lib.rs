/// One dispatch benchmark: a route behind `before` global and `after` global middlewares.
#[derive(Debug, Copy, Clone)]
pub struct TestCase {
    name: &'static str,
    group: TestGroup,
    before: usize,
    after: usize,
}

impl TestCase {
    pub fn new(name: &'static str, group: TestGroup, before: usize, after: usize) -> Self {
        Self { name, group, before, after }
    }

    pub fn small(name: &'static str) -> Self {
        Self::new(name, TestGroup::Small, 0, 0)
    }

    pub fn normal(name: &'static str) -> Self {
        Self::new(name, TestGroup::Normal, 2, 2)
    }

    pub fn large(name: &'static str) -> Self {
        Self::new(name, TestGroup::Large, 16, 16)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn group(&self) -> TestGroup {
        self.group
    }

    pub fn before(&self) -> usize {
        self.before
    }

    pub fn after(&self) -> usize {
        self.after
    }

    pub fn chain_len(&self) -> usize {
        self.before + self.after
    }
}

#[derive(Clone, Copy, Debug)]
pub enum TestGroup {
    Small,
    Normal,
    Large,
}
