//! Element descriptors: the input the reconciler diffs against the fiber tree.

use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::error::RenderError;
use crate::hooks::RenderCx;

/// Signature of a function component's render function.
pub type RenderFn = dyn Fn(&mut RenderCx<'_>, &Props) -> Result<Node, RenderError>;

/// A function component.
///
/// Two components are the same type only if they share the same render
/// function allocation, so create a component once and clone it.
#[derive(Clone)]
pub struct Component {
    name: Rc<str>,
    render: Rc<RenderFn>,
}

impl Component {
    /// Create a component from a render function.
    pub fn new(
        name: &str,
        render: impl Fn(&mut RenderCx<'_>, &Props) -> Result<Node, RenderError> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            render: Rc::new(render),
        }
    }

    /// The name used in errors and logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn render(&self, cx: &mut RenderCx<'_>, props: &Props) -> Result<Node, RenderError> {
        (self.render)(cx, props)
    }
}

impl PartialEq for Component {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.render, &other.render)
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Component").field(&self.name).finish()
    }
}

/// What an element instantiates.
#[derive(Clone, PartialEq, Debug)]
pub enum ElementType {
    /// A host node, identified by its tag name.
    Host(Rc<str>),
    /// A function component.
    Component(Component),
}

/// A sibling identity that survives reordering.
#[derive(Clone, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct Key(Rc<str>);

impl Key {
    /// The key as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Self(value.into())
    }
}

macro_rules! key_from_int {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Key {
            fn from(value: $ty) -> Self {
                Self(value.to_string().into())
            }
        })*
    };
}

key_from_int!(i32, i64, u32, u64, usize);

/// A callback attached to a host node, invoked by the host's event layer.
#[derive(Clone)]
pub struct Handler(Rc<dyn Fn()>);

impl Handler {
    /// Wrap a closure.
    pub fn new(f: impl Fn() + 'static) -> Self {
        Self(Rc::new(f))
    }

    /// Invoke the handler.
    pub fn call(&self) {
        (self.0)()
    }
}

impl PartialEq for Handler {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// A single attribute value.
#[derive(Clone)]
pub enum PropValue {
    /// Text.
    Str(Rc<str>),
    /// Integer.
    Int(i64),
    /// Float, compared by bit pattern.
    Float(f64),
    /// Boolean.
    Bool(bool),
    /// Event handler.
    Handler(Handler),
}

impl PartialEq for PropValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Handler(a), Self::Handler(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Handler(_) => f.write_str("<handler>"),
        }
    }
}

impl fmt::Display for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            other => fmt::Debug::fmt(other, f),
        }
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        Self::Str(value.into())
    }
}

impl From<String> for PropValue {
    fn from(value: String) -> Self {
        Self::Str(value.into())
    }
}

impl From<i64> for PropValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for PropValue {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<f64> for PropValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for PropValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Handler> for PropValue {
    fn from(value: Handler) -> Self {
        Self::Handler(value)
    }
}

/// Attributes plus children of an element.
#[derive(Clone, Default, Debug)]
pub struct Props {
    attrs: BTreeMap<Rc<str>, PropValue>,
    children: Vec<Node>,
}

impl Props {
    /// Look up an attribute.
    pub fn get(&self, name: &str) -> Option<&PropValue> {
        self.attrs.get(name)
    }

    /// Look up an attribute holding text.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.attrs.get(name) {
            Some(PropValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// Look up an attribute holding an integer.
    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.attrs.get(name) {
            Some(PropValue::Int(i)) => Some(*i),
            _ => None,
        }
    }

    /// All attributes in name order.
    pub fn attrs(&self) -> impl Iterator<Item = (&str, &PropValue)> {
        self.attrs.iter().map(|(name, value)| (&**name, value))
    }

    /// Child descriptors.
    pub fn children(&self) -> &[Node] {
        &self.children
    }

    /// The children as a single node: nothing, the only child, or a list.
    pub fn children_node(&self) -> Node {
        match self.children.as_slice() {
            [] => Node::Empty,
            [only] => only.clone(),
            many => Node::List(many.to_vec()),
        }
    }

    /// Whether the attributes of two prop sets are equal. Children are
    /// reconciled separately and not compared.
    pub fn attrs_eq(&self, other: &Props) -> bool {
        self.attrs == other.attrs
    }
}

/// A mutable slot that receives a host instance once it is committed.
#[derive(Clone, Default)]
pub struct HostRef(Rc<RefCell<Option<Rc<dyn Any>>>>);

impl HostRef {
    /// Create an empty ref.
    pub fn new() -> Self {
        Self::default()
    }

    /// The attached instance, if it has the requested type.
    pub fn get<T: Clone + 'static>(&self) -> Option<T> {
        self.0.borrow().as_ref()?.downcast_ref::<T>().cloned()
    }

    /// Whether an instance is attached.
    pub fn is_attached(&self) -> bool {
        self.0.borrow().is_some()
    }

    pub(crate) fn attach<T: 'static>(&self, instance: T) {
        *self.0.borrow_mut() = Some(Rc::new(instance));
    }

    pub(crate) fn detach(&self) {
        self.0.borrow_mut().take();
    }
}

impl PartialEq for HostRef {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for HostRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostRef")
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// A host or component element.
#[derive(Clone, Debug)]
pub struct Element {
    pub(crate) element_type: ElementType,
    pub(crate) key: Option<Key>,
    pub(crate) props: Rc<Props>,
    pub(crate) host_ref: Option<HostRef>,
}

impl Element {
    /// The element type.
    pub fn element_type(&self) -> &ElementType {
        &self.element_type
    }

    /// The element key.
    pub fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    /// The element props.
    pub fn props(&self) -> &Props {
        &self.props
    }
}

/// A group of children without a host node of its own.
#[derive(Clone, Debug)]
pub struct Fragment {
    pub(crate) key: Option<Key>,
    pub(crate) children: Vec<Node>,
}

/// One node of the element tree handed to the reconciler.
#[derive(Clone, Debug, Default)]
pub enum Node {
    /// A host or component element.
    Element(Element),
    /// A fragment.
    Fragment(Fragment),
    /// A text node.
    Text(Rc<str>),
    /// A sibling group, diffed by key (or position when unkeyed).
    List(Vec<Node>),
    /// Renders nothing.
    #[default]
    Empty,
}

impl Node {
    /// A text node.
    pub fn text(content: impl Into<Rc<str>>) -> Self {
        Self::Text(content.into())
    }

    /// An unkeyed fragment.
    pub fn fragment(children: impl IntoIterator<Item = Node>) -> Self {
        Self::Fragment(Fragment {
            key: None,
            children: children.into_iter().collect(),
        })
    }

    /// A keyed fragment.
    pub fn keyed_fragment(key: impl Into<Key>, children: impl IntoIterator<Item = Node>) -> Self {
        Self::Fragment(Fragment {
            key: Some(key.into()),
            children: children.into_iter().collect(),
        })
    }

    /// A sibling group.
    pub fn list(children: impl IntoIterator<Item = Node>) -> Self {
        Self::List(children.into_iter().collect())
    }
}

impl From<&str> for Node {
    fn from(value: &str) -> Self {
        Self::text(value)
    }
}

impl From<String> for Node {
    fn from(value: String) -> Self {
        Self::text(value)
    }
}

macro_rules! node_from_number {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Node {
            fn from(value: $ty) -> Self {
                Self::text(value.to_string())
            }
        })*
    };
}

node_from_number!(i32, i64, u32, u64, usize, f64);

impl From<Vec<Node>> for Node {
    fn from(value: Vec<Node>) -> Self {
        Self::List(value)
    }
}

impl From<ElementBuilder> for Node {
    fn from(value: ElementBuilder) -> Self {
        value.build()
    }
}

/// Start building a host element.
pub fn h(tag: &str) -> ElementBuilder {
    ElementBuilder::new(ElementType::Host(tag.into()))
}

/// Start building a component element.
pub fn component(component: &Component) -> ElementBuilder {
    ElementBuilder::new(ElementType::Component(component.clone()))
}

/// Chained builder for [`Element`] nodes.
#[must_use]
pub struct ElementBuilder {
    element_type: ElementType,
    key: Option<Key>,
    props: Props,
    host_ref: Option<HostRef>,
}

impl ElementBuilder {
    fn new(element_type: ElementType) -> Self {
        Self {
            element_type,
            key: None,
            props: Props::default(),
            host_ref: None,
        }
    }

    /// Set the key.
    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Set an attribute.
    pub fn attr(mut self, name: &str, value: impl Into<PropValue>) -> Self {
        self.props.attrs.insert(name.into(), value.into());
        self
    }

    /// Attach a handler for the named event, stored as the `on<event>` attribute.
    pub fn on(self, event: &str, f: impl Fn() + 'static) -> Self {
        let name = format!("on{event}");
        self.attr(&name, Handler::new(f))
    }

    /// Append a child.
    pub fn child(mut self, child: impl Into<Node>) -> Self {
        self.props.children.push(child.into());
        self
    }

    /// Append several children.
    pub fn children(mut self, children: impl IntoIterator<Item = Node>) -> Self {
        self.props.children.extend(children);
        self
    }

    /// Attach a host ref.
    pub fn host_ref(mut self, host_ref: &HostRef) -> Self {
        self.host_ref = Some(host_ref.clone());
        self
    }

    /// Finish the element.
    pub fn build(self) -> Node {
        Node::Element(Element {
            element_type: self.element_type,
            key: self.key,
            props: Rc::new(self.props),
            host_ref: self.host_ref,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_identity_is_by_allocation() {
        let a = Component::new("A", |_, _| Ok(Node::Empty));
        let b = Component::new("A", |_, _| Ok(Node::Empty));
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn children_node_collapses_single_child() {
        let Node::Element(one) = h("div").child("hi").build() else {
            panic!("expected element");
        };
        assert!(matches!(one.props().children_node(), Node::Text(ref t) if &**t == "hi"));

        let Node::Element(two) = h("div").child("a").child("b").build() else {
            panic!("expected element");
        };
        assert!(matches!(two.props().children_node(), Node::List(ref v) if v.len() == 2));
    }

    #[test]
    fn attrs_eq_ignores_children() {
        let Node::Element(a) = h("p").attr("id", "x").child("a").build() else {
            panic!("expected element");
        };
        let Node::Element(b) = h("p").attr("id", "x").child("b").build() else {
            panic!("expected element");
        };
        assert!(a.props().attrs_eq(b.props()));
    }

    #[test]
    fn host_ref_holds_typed_instance() {
        let host_ref = HostRef::new();
        assert_eq!(host_ref.get::<u32>(), None);
        host_ref.attach(7u32);
        assert_eq!(host_ref.get::<u32>(), Some(7));
        assert_eq!(host_ref.get::<String>(), None);
        host_ref.detach();
        assert!(!host_ref.is_attached());
    }
}
