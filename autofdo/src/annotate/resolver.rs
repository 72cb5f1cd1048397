//! Inline-stack resolution
//!
//! A location in the function being compiled may sit inside code that was
//! inlined from elsewhere. Walking its lexical scopes outward yields the
//! inline stack: one `(function, location key)` entry per inlined frame,
//! leaf first, ending with the function under compilation. The profile forest
//! is then descended from the outermost entry toward the leaf.

use crate::ir::{DeclId, Location, Program};
use crate::profile::{location_key, CountInfo, FunctionInstance, Profile};
use smallvec::SmallVec;

/// One frame of an inline stack: the function whose code the location
/// belongs to, and the location's key relative to that function's start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InlineStackEntry {
    pub decl: DeclId,
    pub key: u32,
}

/// Leaf first. Most locations are at most a few frames deep.
pub type InlineStack = SmallVec<[InlineStackEntry; 4]>;

/// Key of `location` relative to the start line of `decl`.
pub fn combined_location(program: &Program, location: &Location, decl: DeclId) -> u32 {
    let start = program.decl(decl).start_line();
    location_key(location.line.wrapping_sub(start), location.discriminator)
}

/// Inline stack of `location` inside `current`; empty for an unknown location.
pub fn inline_stack(program: &Program, current: DeclId, location: Option<&Location>) -> InlineStack {
    let mut stack = InlineStack::new();
    let Some(location) = location else {
        return stack;
    };

    let mut locus = *location;
    let mut scope = location.scope;
    while let Some(id) = scope {
        let Some(lexical) = program.scope(id) else {
            break;
        };
        if let Some(inlined) = lexical.inlined {
            stack.push(InlineStackEntry {
                decl: inlined.callee,
                key: combined_location(program, &locus, inlined.callee),
            });
            locus = inlined.call_location;
        }
        scope = lexical.parent;
    }

    stack.push(InlineStackEntry {
        decl: current,
        key: combined_location(program, &locus, current),
    });
    stack
}

/// Root instance recorded for a declaration.
pub fn function_instance<'p>(
    profile: &'p Profile,
    program: &Program,
    decl: DeclId,
) -> Option<&'p FunctionInstance> {
    let index = profile.strings.index_by_decl(program, decl)?;
    profile.source.root(index)
}

/// Instance reached by descending from the stack's outermost function through
/// the callsite of every frame but the leaf.
pub fn find_instance_along_stack<'p>(
    profile: &'p Profile,
    program: &Program,
    stack: &[InlineStackEntry],
) -> Option<&'p FunctionInstance> {
    let (outermost, inner) = stack.split_last()?;
    let root = profile.strings.index_by_decl(program, outermost.decl)?;
    if inner.is_empty() {
        return profile.source.root(root);
    }
    let keys = std::iter::once(outermost.key).chain(inner[1..].iter().rev().map(|entry| entry.key));
    profile.source.find_instance(root, keys)
}

/// Profile lookups for the locations of one function.
pub struct ProfileResolver<'a> {
    profile: &'a Profile,
    program: &'a Program,
    function: DeclId,
    end_locus: Option<Location>,
}

impl<'a> ProfileResolver<'a> {
    pub fn new(
        profile: &'a Profile,
        program: &'a Program,
        function: DeclId,
        end_locus: Option<Location>,
    ) -> Self {
        Self {
            profile,
            program,
            function,
            end_locus,
        }
    }

    pub fn function(&self) -> DeclId {
        self.function
    }

    pub fn program(&self) -> &'a Program {
        self.program
    }

    pub fn profile(&self) -> &'a Profile {
        self.profile
    }

    pub fn inline_stack(&self, location: Option<&Location>) -> InlineStack {
        inline_stack(self.program, self.function, location)
    }

    pub fn function_instance(&self) -> Option<&'a FunctionInstance> {
        function_instance(self.profile, self.program, self.function)
    }

    pub fn instance_for_stack(&self, stack: &[InlineStackEntry]) -> Option<&'a FunctionInstance> {
        find_instance_along_stack(self.profile, self.program, stack)
    }

    /// Leaf key of the location's inline stack.
    pub fn relative_location(&self, location: Option<&Location>) -> Option<u32> {
        self.inline_stack(location).first().map(|entry| entry.key)
    }

    pub fn is_end_locus(&self, location: &Location) -> bool {
        self.end_locus
            .as_ref()
            .is_some_and(|end| end.same_line(location))
    }

    /// Samples recorded for `location`. The function's closing line is
    /// never consulted.
    pub fn count_info(&self, location: Option<&Location>) -> Option<&'a CountInfo> {
        let location = location?;
        if self.is_end_locus(location) {
            return None;
        }
        let stack = self.inline_stack(Some(location));
        let leaf = stack.first()?;
        self.instance_for_stack(&stack)?.count_info(leaf.key)
    }

    /// Mark the position for `location` annotated, if the profile has one.
    pub fn mark_annotated(&self, location: Option<&Location>) {
        let stack = self.inline_stack(location);
        let Some(leaf) = stack.first() else {
            return;
        };
        if let Some(instance) = self.instance_for_stack(&stack) {
            instance.mark_annotated(leaf.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::FunctionDecl;
    use crate::profile::{CountInfo, FunctionInstance};

    struct Fixture {
        program: Program,
        profile: Profile,
        foo: DeclId,
        inlined_loc: Location,
        own_loc: Location,
    }

    // foo starts at line 10 and inlines bar (line 100) at line 15, disc 2.
    fn fixture() -> Fixture {
        let mut program = Program::new();
        let file = program.source_map.add_named("a.c");
        let foo = program.add_function(FunctionDecl::new("foo", file, 10).with_end_line(40));
        let bar = program.add_function(FunctionDecl::new("bar", file, 100));
        let body_scope = program.add_scope(Default::default());
        let call = Location::new(file, 15).with_discriminator(2).in_scope(body_scope);
        let inlined = program.add_inlined_scope(Some(body_scope), bar, call);

        let mut profile = Profile::new();
        let foo_idx = profile.strings.intern("foo");
        let bar_idx = profile.strings.intern("bar");
        let mut bar_inst = FunctionInstance::new(bar_idx, 0);
        bar_inst.add_position(location_key(3, 1), CountInfo::new(7));
        let mut root = FunctionInstance::new(foo_idx, 5);
        root.add_position(location_key(2, 0), CountInfo::new(11));
        root.add_callsite(location_key(5, 2), bar_inst);
        profile.add_root(root);

        Fixture {
            program,
            profile,
            foo,
            inlined_loc: Location::new(file, 103).with_discriminator(1).in_scope(inlined),
            own_loc: Location::new(file, 12).in_scope(body_scope),
        }
    }

    #[test]
    fn stack_is_leaf_first() {
        let f = fixture();
        let stack = inline_stack(&f.program, f.foo, Some(&f.inlined_loc));
        assert_eq!(stack.len(), 2);
        assert_eq!(f.program.decl(stack[0].decl).assembler_name, "bar");
        assert_eq!(stack[0].key, location_key(3, 1));
        assert_eq!(stack[1].decl, f.foo);
        assert_eq!(stack[1].key, location_key(5, 2));

        assert!(inline_stack(&f.program, f.foo, None).is_empty());
    }

    #[test]
    fn count_info_through_inlined_frame() {
        let f = fixture();
        let resolver = ProfileResolver::new(&f.profile, &f.program, f.foo, None);

        assert_eq!(resolver.count_info(Some(&f.inlined_loc)).map(|i| i.count), Some(7));
        assert_eq!(resolver.count_info(Some(&f.own_loc)).map(|i| i.count), Some(11));
        assert_eq!(resolver.relative_location(Some(&f.inlined_loc)), Some(location_key(3, 1)));
        assert!(resolver.count_info(None).is_none());
        assert_eq!(resolver.function_instance().map(|i| i.total_count()), Some(18));
    }

    #[test]
    fn end_locus_is_skipped() {
        let f = fixture();
        let resolver = ProfileResolver::new(&f.profile, &f.program, f.foo, Some(f.own_loc));
        assert!(resolver.count_info(Some(&f.own_loc)).is_none());

        resolver.mark_annotated(Some(&f.own_loc));
        let root = resolver.function_instance().unwrap();
        assert!(root.count_info(location_key(2, 0)).unwrap().is_annotated());
    }

    #[test]
    fn unmatched_frame_is_not_found() {
        let mut f = fixture();
        let file = f.own_loc.file;
        let baz = f.program.add_function(FunctionDecl::new("baz", file, 200));
        let scope = f.program.add_inlined_scope(None, baz, Location::new(file, 30));
        let resolver = ProfileResolver::new(&f.profile, &f.program, f.foo, None);
        assert!(resolver.count_info(Some(&Location::new(file, 201).in_scope(scope))).is_none());
    }
}
