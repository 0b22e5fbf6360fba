// Parser for port type notation.
//
// Parses a token stream (from the lexer) into a `PortType`. Uses chumsky
// combinators.
//
//   type        := payload ':' unit ('@' card)? ('!' temporality)?
//   payload     := IDENT | '?' IDENT
//   unit        := IDENT | '?' IDENT
//   card        := 'zero' | 'one' | 'many' '(' IDENT ')' | '?' IDENT
//   temporality := 'continuous' | 'discrete'
//
// Omitted cardinality means `one`; omitted temporality means `continuous`.
//
// Preconditions: none.
// Postconditions: a returned PortType satisfies the payload/unit validity table.
// Failure modes: lex errors, syntax errors, unknown names and invalid
//   payload/unit pairs all produce `NotationError` with a byte span.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;
use thiserror::Error;

use crate::lexer::Token;
use crate::types::{
    Axis, CanonicalType, Cardinality, InstanceRef, PayloadType, PortType, Temporality, Unit,
};

/// Failure to read a type annotation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotationError {
    #[error("invalid type notation '{text}' at {start}..{end}: {message}")]
    Syntax {
        text: String,
        start: usize,
        end: usize,
        message: String,
    },
    #[error("invalid type notation '{text}': {message}")]
    Invalid { text: String, message: String },
}

/// Parse a port type annotation such as `float:radians@?C`.
pub fn parse_port_type(text: &str) -> Result<PortType, NotationError> {
    let lex_result = crate::lexer::lex(text);
    if let Some(err) = lex_result.errors.first() {
        return Err(NotationError::Syntax {
            text: text.to_string(),
            start: err.span.start,
            end: err.span.end,
            message: err.message.clone(),
        });
    }

    let len = text.len();
    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let (ty, errors) = port_type_parser(text).parse(stream).into_output_errors();
    if let Some(err) = errors.first() {
        let span = *err.span();
        return Err(NotationError::Syntax {
            text: text.to_string(),
            start: span.start(),
            end: span.end(),
            message: err.to_string(),
        });
    }
    ty.ok_or_else(|| NotationError::Invalid {
        text: text.to_string(),
        message: "no type produced".to_string(),
    })
}

/// Parse an annotation that must be fully concrete.
pub fn parse_canonical_type(text: &str) -> Result<CanonicalType, NotationError> {
    let ty = parse_port_type(text)?;
    ty.to_canonical().map_err(|e| NotationError::Invalid {
        text: text.to_string(),
        message: e.to_string(),
    })
}

// ── Parser builder ──
//
// Identifiers carry no value in the token stream, so the `source` reference
// is captured once and shared by every combinator that needs the text.

fn port_type_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, PortType, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    let ident = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        source[span.start()..span.end()].to_string()
    });

    let var = just(Token::Question).ignore_then(ident.clone());

    let payload = var
        .clone()
        .map(|name| Axis::Var(name))
        .or(ident.clone().try_map(|name: String, span| {
            PayloadType::from_name(&name)
                .map(Axis::Inst)
                .ok_or_else(|| Rich::custom(span, format!("unknown payload '{}'", name)))
        }));

    let unit = var
        .clone()
        .map(|name| Axis::Var(name))
        .or(ident.clone().try_map(|name: String, span| {
            Unit::from_name(&name)
                .map(Axis::Inst)
                .ok_or_else(|| Rich::custom(span, format!("unknown unit '{}'", name)))
        }));

    let card_inst = ident
        .clone()
        .then(
            ident
                .clone()
                .delimited_by(just(Token::LParen), just(Token::RParen))
                .or_not(),
        )
        .try_map(|(name, instance): (String, Option<String>), span| {
            match (name.as_str(), instance) {
                ("zero", None) => Ok(Cardinality::Zero),
                ("one", None) => Ok(Cardinality::One),
                ("many", Some(inst)) => Ok(Cardinality::Many(InstanceRef(inst))),
                ("many", None) => Err(Rich::custom(
                    span,
                    "'many' requires an instance domain, e.g. many(particles)",
                )),
                _ => Err(Rich::custom(
                    span,
                    format!("unknown cardinality '{}'", name),
                )),
            }
        });

    let card = var
        .clone()
        .map(|name| Axis::Var(name))
        .or(card_inst.map(Axis::Inst));

    let temporality = ident.clone().try_map(|name: String, span| match name.as_str() {
        "continuous" => Ok(Temporality::Continuous),
        "discrete" => Ok(Temporality::Discrete),
        _ => Err(Rich::custom(
            span,
            format!("unknown temporality '{}'", name),
        )),
    });

    payload
        .then_ignore(just(Token::Colon))
        .then(unit)
        .then(just(Token::At).ignore_then(card).or_not())
        .then(just(Token::Bang).ignore_then(temporality).or_not())
        .try_map(|(((payload, unit), card), temporality), span| {
            PortType::new(
                payload,
                unit,
                card.unwrap_or(Axis::Inst(Cardinality::One)),
                temporality.unwrap_or_default(),
            )
            .map_err(|e| Rich::custom(span, e.to_string()))
        })
        .then_ignore(end())
}

// ── Tests ──
