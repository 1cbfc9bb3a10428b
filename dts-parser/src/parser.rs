use nom::{
    branch::alt,
    bytes::complete::{is_a, is_not, tag, take_until},
    character::complete::{alphanumeric1, anychar, char, multispace1, not_line_ending},
    combinator::{all_consuming, cut, map, opt, recognize},
    error::{context, ContextError, ParseError, VerboseError},
    multi::{many0, many1, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
    Finish,
};
use nom_locate::LocatedSpan;

use crate::{ast::*, Error};

pub(crate) type Input<'a> = LocatedSpan<&'a str>;

type IResult<'a, T, E> = nom::IResult<Input<'a>, T, E>;

/// Error types usable by the grammar: they must be able to carry a context message.
trait GrammarError<'a>: ParseError<Input<'a>> + ContextError<Input<'a>> {}

impl<'a, E> GrammarError<'a> for E where E: ParseError<Input<'a>> + ContextError<Input<'a>> {}

/// Parse a Device Tree from a string.
pub fn from_str(s: &str) -> Result<Dts<'_>, Error> {
    match all_consuming(dts_file::<VerboseError<Input>>)(Input::new(s)).finish() {
        Ok((_, dts)) => Ok(dts),
        Err(e) => Err(Error::from_verbose(e)),
    }
}

/// Parse a Device Tree source file.
///
/// A file starts with the version directive, followed by any mix of passthrough
/// directives and top-level nodes. At least one node is required.
fn dts_file<'a, E: GrammarError<'a>>(input: Input<'a>) -> IResult<'a, Dts<'a>, E> {
    map(
        tuple((
            context("expected '/dts-v1/;' version directive", version_directive),
            many0(map(directive, RootItem::Directive)),
            context("expected at least one node", cut(node)),
            many0(alt((
                map(directive, RootItem::Directive),
                map(node, RootItem::Node),
            ))),
            ws,
        )),
        |(version, mut items, first, rest, _)| {
            items.push(RootItem::Node(first));
            items.extend(rest);
            Dts { version, items }
        },
    )(input)
}

/// Parse a version directive.
///
/// Any `/dts-…/` token is accepted here, the supported version is checked later on.
fn version_directive<'a, E: GrammarError<'a>>(input: Input<'a>) -> IResult<'a, Version<'a>, E> {
    map(
        terminated(
            lexeme(delimited(char('/'), version_str, char('/'))),
            context("expected ';' after version directive", cut(terminator)),
        ),
        |v: Input<'a>| Version(*v.fragment()),
    )(input)
}

/// Parse a passthrough preprocessor directive, i.e. an `#include` or `#define` line.
fn directive<'a, E: GrammarError<'a>>(input: Input<'a>) -> IResult<'a, Directive<'a>, E> {
    let include = map(recognize(pair(tag("#include"), not_line_ending)), |s| {
        Directive::Include(trimmed(s))
    });
    let define = map(recognize(pair(tag("#define"), not_line_ending)), |s| {
        Directive::Define(trimmed(s))
    });

    lexeme(alt((include, define)))(input)
}

/// Parse a node, including its optional label.
///
/// Nodes can be nested to any depth and are always terminated by a `;`.
fn node<'a, E: GrammarError<'a>>(input: Input<'a>) -> IResult<'a, Node<'a>, E> {
    map(
        tuple((
            opt(terminated(node_label, label_separator)),
            node_name,
            node_body,
            context("expected ';' after node", cut(terminator)),
        )),
        |(label, name, (props, children), _)| Node {
            name: *name.fragment(),
            label: label.map(|l: Input<'a>| *l.fragment()),
            props,
            children,
        },
    )(input)
}

/// Parse the body of a node, returning its properties and child nodes separately.
fn node_body<'a, E: GrammarError<'a>>(
    input: Input<'a>,
) -> IResult<'a, (Vec<Property<'a>>, Vec<Node<'a>>), E> {
    preceded(
        left_brace,
        cut(terminated(
            node_contents,
            context("expected '}' closing node", right_brace),
        )),
    )(input)
}

/// Parse the contents of a node.
fn node_contents<'a, E: GrammarError<'a>>(
    input: Input<'a>,
) -> IResult<'a, (Vec<Property<'a>>, Vec<Node<'a>>), E> {
    enum NodeContent<'s> {
        Node(Node<'s>),
        Prop(Property<'s>),
    }

    // A node can contain 0+ properties and 0+ child nodes, in any order.
    map(
        many0(alt((map(node, NodeContent::Node), map(property, NodeContent::Prop)))),
        |contents| {
            contents.into_iter().fold(
                (Vec::new(), Vec::new()),
                |(mut props, mut children), elem| {
                    match elem {
                        NodeContent::Prop(p) => props.push(p),
                        NodeContent::Node(n) => children.push(n),
                    };
                    (props, children)
                },
            )
        },
    )(input)
}

/// Parse a node property.
///
/// A property without a value (e.g. `enabled;`) has a `None` value.
fn property<'a, E: GrammarError<'a>>(input: Input<'a>) -> IResult<'a, Property<'a>, E> {
    map(
        tuple((
            prop_name,
            opt(preceded(
                assignment,
                context("expected property value", cut(prop_value)),
            )),
            context("expected ';' after property", cut(terminator)),
        )),
        |(name, value, _)| Property {
            name: *name.fragment(),
            value,
        },
    )(input)
}

/// Parse a property value.
fn prop_value<'a, E: GrammarError<'a>>(input: Input<'a>) -> IResult<'a, PropertyValue<'a>, E> {
    alt((
        prop_value_str,
        prop_value_ref,
        prop_value_array,
        prop_value_expr,
        prop_value_literal,
    ))(input)
}

/// Parse a property value corresponding to a string.
fn prop_value_str<'a, E: GrammarError<'a>>(
    input: Input<'a>,
) -> IResult<'a, PropertyValue<'a>, E> {
    lexeme(map(string_literal, |s: Input<'a>| {
        PropertyValue::Str(*s.fragment())
    }))(input)
}

/// Parse a property value corresponding to a reference to another node.
fn prop_value_ref<'a, E: GrammarError<'a>>(
    input: Input<'a>,
) -> IResult<'a, PropertyValue<'a>, E> {
    map(node_reference, PropertyValue::Ref)(input)
}

/// Parse a property value corresponding to an array.
///
/// Arrays are delimited by either chevrons or braces. Their elements are separated by
/// whitespace and/or commas, may be of any value kind and can be empty.
fn prop_value_array<'a, E: GrammarError<'a>>(
    input: Input<'a>,
) -> IResult<'a, PropertyValue<'a>, E> {
    let elements = || many0(terminated(prop_value, opt(list_separator)));

    map(
        alt((
            preceded(
                left_chevron,
                cut(terminated(
                    elements(),
                    context("expected '>' closing array", right_chevron),
                )),
            ),
            preceded(
                left_brace,
                cut(terminated(
                    elements(),
                    context("expected '}' closing array", right_brace),
                )),
            ),
        )),
        PropertyValue::Array,
    )(input)
}

/// Parse a property value corresponding to a parenthesized expression.
///
/// The expression is not interpreted, only the balancing of the parentheses is checked.
fn prop_value_expr<'a, E: GrammarError<'a>>(
    input: Input<'a>,
) -> IResult<'a, PropertyValue<'a>, E> {
    lexeme(map(recognize(parenthesized), |s: Input<'a>| {
        PropertyValue::Expr(*s.fragment())
    }))(input)
}

/// Parse a property value corresponding to a bare literal token.
fn prop_value_literal<'a, E: GrammarError<'a>>(
    input: Input<'a>,
) -> IResult<'a, PropertyValue<'a>, E> {
    lexeme(map(literal_str, |s: Input<'a>| {
        PropertyValue::Literal(*s.fragment())
    }))(input)
}

/// Parse a valid node reference.
///
/// A reference is either a name (`&i2c0`) or a full path between braces (`&{/soc/i2c@0}`).
fn node_reference<'a, E: GrammarError<'a>>(input: Input<'a>) -> IResult<'a, Reference<'a>, E> {
    let by_path = map(
        delimited(char('{'), node_path, cut(char('}'))),
        |s: Input<'a>| Reference::Path(*s.fragment()),
    );
    let by_name = map(reference_str, |s: Input<'a>| Reference::Name(*s.fragment()));

    preceded(
        reference_operator,
        context("expected node reference", cut(lexeme(alt((by_path, by_name))))),
    )(input)
}

/// Parse a node label.
fn node_label<'a, E: GrammarError<'a>>(input: Input<'a>) -> IResult<'a, Input<'a>, E> {
    lexeme(node_label_str)(input)
}

/// Parse a valid node name.
///
/// The root node is always named `/`. Other nodes are composed of a node-name part and an
/// optional unit-address.
fn node_name<'a, E: GrammarError<'a>>(input: Input<'a>) -> IResult<'a, Input<'a>, E> {
    lexeme(alt((tag("/"), node_unit_name)))(input)
}

/// Parse a valid string literal, returning its contents without the quotes.
fn string_literal<'a, E: GrammarError<'a>>(input: Input<'a>) -> IResult<'a, Input<'a>, E> {
    preceded(
        char('"'),
        cut(terminated(
            string_contents,
            context("unterminated string", char('"')),
        )),
    )(input)
}

/* === Low-level syntax parsers === */

/// Recognize an assignment operator.
fn assignment<'a, E: GrammarError<'a>>(input: Input<'a>) -> IResult<'a, char, E> {
    lexeme(char('='))(input)
}

/// Recognize a statement terminator.
fn terminator<'a, E: GrammarError<'a>>(input: Input<'a>) -> IResult<'a, char, E> {
    lexeme(char(';'))(input)
}

/// Recognize a list separator.
fn list_separator<'a, E: GrammarError<'a>>(input: Input<'a>) -> IResult<'a, char, E> {
    lexeme(char(','))(input)
}

/// Recognize a label separator.
fn label_separator<'a, E: GrammarError<'a>>(input: Input<'a>) -> IResult<'a, char, E> {
    lexeme(char(':'))(input)
}

/// Recognize an opening brace.
fn left_brace<'a, E: GrammarError<'a>>(input: Input<'a>) -> IResult<'a, char, E> {
    lexeme(char('{'))(input)
}

/// Recognize a closing brace.
fn right_brace<'a, E: GrammarError<'a>>(input: Input<'a>) -> IResult<'a, char, E> {
    lexeme(char('}'))(input)
}

/// Recognize an opening chevron.
fn left_chevron<'a, E: GrammarError<'a>>(input: Input<'a>) -> IResult<'a, char, E> {
    lexeme(char('<'))(input)
}

/// Recognize a closing chevron.
fn right_chevron<'a, E: GrammarError<'a>>(input: Input<'a>) -> IResult<'a, char, E> {
    lexeme(char('>'))(input)
}

/// Recognize a reference operator.
fn reference_operator<'a, E: GrammarError<'a>>(input: Input<'a>) -> IResult<'a, char, E> {
    lexeme(char('&'))(input)
}

/// Recognize a balanced parenthesized group.
fn parenthesized<'a, E: GrammarError<'a>>(input: Input<'a>) -> IResult<'a, Input<'a>, E> {
    recognize(delimited(
        char('('),
        many0(alt((is_not("()"), parenthesized))),
        context("expected ')' closing expression", cut(char(')'))),
    ))(input)
}

/// Recognize the contents of a string literal, including escape sequences.
fn string_contents<'a, E: GrammarError<'a>>(input: Input<'a>) -> IResult<'a, Input<'a>, E> {
    recognize(many0(alt((
        is_not("\\\""),
        recognize(pair(char('\\'), anychar)),
    ))))(input)
}

/// Recognize a version token such as `dts-v1`.
fn version_str<'a, E: GrammarError<'a>>(input: Input<'a>) -> IResult<'a, Input<'a>, E> {
    recognize(pair(tag("dts-"), alphanumeric1))(input)
}

/// Recognize a valid node name string.
fn node_name_str<'a, E: GrammarError<'a>>(input: Input<'a>) -> IResult<'a, Input<'a>, E> {
    recognize(many1(alt((alphanumeric1, is_a(",._+-")))))(input)
}

/// Recognize a node name with its optional unit-address, e.g. `uart@fe001000`.
fn node_unit_name<'a, E: GrammarError<'a>>(input: Input<'a>) -> IResult<'a, Input<'a>, E> {
    recognize(pair(
        node_name_str,
        opt(pair(char('@'), cut(node_name_str))),
    ))(input)
}

/// Recognize a valid node label string.
fn node_label_str<'a, E: GrammarError<'a>>(input: Input<'a>) -> IResult<'a, Input<'a>, E> {
    recognize(many1(alt((alphanumeric1, is_a("_")))))(input)
}

/// Recognize a valid node path, e.g. `/soc/i2c@0`.
fn node_path<'a, E: GrammarError<'a>>(input: Input<'a>) -> IResult<'a, Input<'a>, E> {
    recognize(preceded(
        char('/'),
        opt(separated_list1(char('/'), node_unit_name)),
    ))(input)
}

/// Recognize the target of a reference by name.
///
/// Commas are excluded so references can be separated by commas inside arrays.
fn reference_str<'a, E: GrammarError<'a>>(input: Input<'a>) -> IResult<'a, Input<'a>, E> {
    recognize(many1(alt((alphanumeric1, is_a("_-@.+")))))(input)
}

/// Recognize a valid property name string.
fn prop_name_str<'a, E: GrammarError<'a>>(input: Input<'a>) -> IResult<'a, Input<'a>, E> {
    recognize(many1(alt((alphanumeric1, is_a(",._+?#-")))))(input)
}

/// Recognize a bare literal token.
fn literal_str<'a, E: GrammarError<'a>>(input: Input<'a>) -> IResult<'a, Input<'a>, E> {
    recognize(many1(alt((alphanumeric1, is_a("_.+-")))))(input)
}

/// Parse a property name.
fn prop_name<'a, E: GrammarError<'a>>(input: Input<'a>) -> IResult<'a, Input<'a>, E> {
    lexeme(prop_name_str)(input)
}

/* === Utility functions === */

/// Parse a lexeme using the combinator passed as its argument,
/// also consuming any whitespaces or comments before or after.
fn lexeme<'a, O, F, E: GrammarError<'a>>(f: F) -> impl FnMut(Input<'a>) -> IResult<'a, O, E>
where
    F: FnMut(Input<'a>) -> IResult<'a, O, E>,
{
    delimited(ws, f, ws)
}

/// Consume zero or more whitespace characters or comments.
fn ws<'a, E: GrammarError<'a>>(input: Input<'a>) -> IResult<'a, Input<'a>, E> {
    recognize(many0(alt((multispace1, line_comment, block_comment))))(input)
}

/// Parse block comments.
fn block_comment<'a, E: GrammarError<'a>>(input: Input<'a>) -> IResult<'a, Input<'a>, E> {
    recognize(preceded(
        tag("/*"),
        context("unterminated comment", cut(pair(take_until("*/"), tag("*/")))),
    ))(input)
}

/// Parse a single line comment.
///
/// The parser stops just before the newline character but doesn't consume the newline.
fn line_comment<'a, E: GrammarError<'a>>(input: Input<'a>) -> IResult<'a, Input<'a>, E> {
    recognize(preceded(tag("//"), not_line_ending))(input)
}

/// The fragment of `s` without trailing whitespace.
fn trimmed(s: Input<'_>) -> &str {
    let fragment: &str = *s.fragment();
    fragment.trim_end()
}

/* === Unit Tests === */
