//! Newick reader for haplogroup trees.
//!
//! Accepts nested parentheses, optional unquoted or single-quoted labels on any
//! node, and optional `:length` suffixes, which are discarded. The trailing `;`
//! may be omitted.

use nom::branch::alt;
use nom::bytes::complete::{tag, take_while1};
use nom::character::complete::{char, multispace0, none_of};
use nom::combinator::{map, opt, value};
use nom::error::ParseError;
use nom::multi::{many0, separated_list1};
use nom::number::complete::recognize_float;
use nom::sequence::{delimited, preceded};
use nom::{IResult, Parser};
use tracing::{debug, instrument};

use crate::domain::arena::PhyloTree;
use crate::domain::error::DomainError;
use crate::domain::DomainResult;
use generational_arena::Index;

/// Parsed subtree before it is moved into the arena.
#[derive(Debug, Clone, PartialEq)]
struct RawNode {
    label: Option<String>,
    children: Vec<RawNode>,
}

/// A combinator that takes a parser `inner` and produces a parser that also consumes both leading and
/// trailing whitespace, returning the output of `inner`.
fn ws<'a, F, O, E: ParseError<&'a str>>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O, E>
where
    F: Parser<&'a str, O, E>,
{
    delimited(multispace0, inner, multispace0)
}

fn is_reserved(c: char) -> bool {
    c.is_whitespace() || "()[]':;,".contains(c)
}

fn unquoted_label(input: &str) -> IResult<&str, String> {
    map(take_while1(|c: char| !is_reserved(c)), String::from)(input)
}

// 'it''s' -> it's
fn quoted_label(input: &str) -> IResult<&str, String> {
    delimited(
        char('\''),
        map(
            many0(alt((value('\'', tag("''")), none_of("'")))),
            |chars: Vec<char>| chars.into_iter().collect(),
        ),
        char('\''),
    )(input)
}

fn label(input: &str) -> IResult<&str, Option<String>> {
    opt(alt((quoted_label, unquoted_label)))(input)
}

fn branch_length(input: &str) -> IResult<&str, Option<&str>> {
    opt(preceded(ws(char(':')), recognize_float))(input)
}

fn children(input: &str) -> IResult<&str, Vec<RawNode>> {
    delimited(
        ws(char('(')),
        separated_list1(ws(char(',')), subtree),
        ws(char(')')),
    )(input)
}

fn subtree(input: &str) -> IResult<&str, RawNode> {
    let (input, children) = opt(children)(input)?;
    let (input, label) = ws(label)(input)?;
    let (input, _) = branch_length(input)?;
    Ok((
        input,
        RawNode {
            label: label.filter(|l| !l.is_empty()),
            children: children.unwrap_or_default(),
        },
    ))
}

fn tree(input: &str) -> IResult<&str, RawNode> {
    let (input, root) = ws(subtree)(input)?;
    let (input, _) = opt(ws(char(';')))(input)?;
    Ok((input, root))
}

/// Parse a Newick string into an arena tree.
#[instrument(level = "debug", skip(input))]
pub fn parse_newick(input: &str) -> DomainResult<PhyloTree> {
    let syntax_error = |rest: &str, message: &str| DomainError::NewickSyntax {
        offset: input.len() - rest.len(),
        message: message.to_string(),
    };

    let root = match tree(input) {
        Ok((rest, root)) if rest.is_empty() => root,
        Ok((rest, _)) => return Err(syntax_error(rest, "unexpected trailing input")),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            return Err(syntax_error(e.input, "unexpected character"))
        }
        Err(nom::Err::Incomplete(_)) => return Err(syntax_error("", "incomplete input")),
    };
    if root.children.is_empty() && root.label.is_none() {
        return Err(syntax_error(input.trim_start(), "empty tree"));
    }

    let mut phylo = PhyloTree::new();
    insert(&mut phylo, root, None);
    debug!("parsed newick with {} nodes", phylo.len());
    Ok(phylo)
}

fn insert(tree: &mut PhyloTree, node: RawNode, parent: Option<Index>) {
    let idx = tree.insert_node(node.label, parent);
    for child in node.children {
        insert(tree, child, Some(idx));
    }
}
