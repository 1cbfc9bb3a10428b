/// A parsed Device Tree source file.
///
/// Every string slice borrows from the source text handed to [`crate::from_str`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dts<'s> {
    pub version: Version<'s>,
    pub items: Vec<RootItem<'s>>,
}

impl<'s> Dts<'s> {
    /// Iterate over the passthrough directives, in source order.
    pub fn directives(&self) -> impl Iterator<Item = &Directive<'s>> {
        self.items.iter().filter_map(|item| match item {
            RootItem::Directive(d) => Some(d),
            RootItem::Node(_) => None,
        })
    }

    /// Iterate over the top-level nodes, in source order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node<'s>> {
        self.items.iter().filter_map(|item| match item {
            RootItem::Node(n) => Some(n),
            RootItem::Directive(_) => None,
        })
    }
}

/// The version token of a `/dts-vN/;` directive, without the enclosing slashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version<'s>(pub &'s str);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootItem<'s> {
    Directive(Directive<'s>),
    Node(Node<'s>),
}

/// A preprocessor line copied verbatim into the generated output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive<'s> {
    Include(&'s str),
    Define(&'s str),
}

impl<'s> Directive<'s> {
    /// The full statement text, e.g. `#include <gpio.h>`.
    pub fn statement(&self) -> &'s str {
        match self {
            Directive::Include(s) | Directive::Define(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node<'s> {
    pub name: &'s str,
    pub label: Option<&'s str>,
    pub props: Vec<Property<'s>>,
    pub children: Vec<Node<'s>>,
}

impl<'s> Default for Node<'s> {
    fn default() -> Self {
        Self {
            name: "",
            label: None,
            props: Default::default(),
            children: Default::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property<'s> {
    pub name: &'s str,
    pub value: Option<PropertyValue<'s>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue<'s> {
    /// A bare token such as `400000`, `0x1f` or `GPIO_PIN_NONE`.
    Literal(&'s str),
    /// A parenthesized expression, kept as written including the parentheses.
    Expr(&'s str),
    /// The contents of a double-quoted string, escapes untouched.
    Str(&'s str),
    Ref(Reference<'s>),
    Array(Vec<PropertyValue<'s>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference<'s> {
    /// `&name`, matching either a label or a node name.
    Name(&'s str),
    /// `&{/path/to/node}`
    Path(&'s str),
}
