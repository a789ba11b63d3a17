// snippet.rs — Marker substitution for platform-native code snippets
//
// Platform blocks carry literal target code with placeholders:
//   %%intoken:N%%     N-th input token of the atom
//   %%token%%         the atom's output token
//   %%bundle_index%%  the (0-based) index of a bundle access
// The snippet is lexed with `logos` and rebuilt with the placeholders filled.
//
// Preconditions: snippet is UTF-8 text.
// Postconditions: every placeholder with an available value is replaced;
//   placeholders without a value are kept verbatim and reported.
// Failure modes: none (missing values are reported, not fatal).
// Side effects: none.

use logos::Logos;

#[derive(Logos, Debug, Clone, PartialEq)]
pub enum Marker {
    #[regex(r"%%intoken:[0-9]+%%", parse_intoken)]
    InToken(usize),
    #[token("%%token%%")]
    OutToken,
    #[token("%%bundle_index%%")]
    BundleIndex,
    #[regex(r"[^%]+")]
    Text,
    #[token("%")]
    Percent,
}

fn parse_intoken(lex: &mut logos::Lexer<'_, Marker>) -> Option<usize> {
    let slice = lex.slice();
    slice["%%intoken:".len()..slice.len() - 2].parse().ok()
}

/// Values available for substitution.
#[derive(Debug, Default, Clone, Copy)]
pub struct SnippetArgs<'a> {
    pub inputs: &'a [String],
    pub outputs: &'a [String],
    pub bundle_index: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Substitution {
    pub code: String,
    /// Input indices referenced by the snippet but not supplied.
    pub missing_inputs: Vec<usize>,
}

/// Fill the placeholders of `snippet`.
pub fn substitute(snippet: &str, args: SnippetArgs<'_>) -> Substitution {
    let mut code = String::with_capacity(snippet.len());
    let mut missing_inputs = Vec::new();
    let mut lexer = Marker::lexer(snippet);
    while let Some(token) = lexer.next() {
        let slice = lexer.slice();
        match token {
            Ok(Marker::InToken(i)) => match args.inputs.get(i) {
                Some(tok) => code.push_str(tok),
                None => {
                    missing_inputs.push(i);
                    code.push_str(slice);
                }
            },
            Ok(Marker::OutToken) => match args.outputs.first() {
                Some(tok) => code.push_str(tok),
                None => code.push_str(slice),
            },
            Ok(Marker::BundleIndex) => code.push_str(args.bundle_index.unwrap_or(slice)),
            Ok(Marker::Text) | Ok(Marker::Percent) | Err(()) => code.push_str(slice),
        }
    }
    Substitution {
        code,
        missing_inputs,
    }
}

/// Highest input index referenced plus one.
pub fn input_arity(snippet: &str) -> usize {
    Marker::lexer(snippet)
        .filter_map(|t| match t {
            Ok(Marker::InToken(i)) => Some(i + 1),
            _ => None,
        })
        .max()
        .unwrap_or(0)
}

/// Snippets may omit their final newline.
pub fn with_newline(mut code: String) -> String {
    if !code.is_empty() && !code.ends_with('\n') {
        code.push('\n');
    }
    code
}

/// True when the snippet assigns its output through `%%token%%`; otherwise
/// it is a bare expression.
pub fn writes_output(snippet: &str) -> bool {
    Marker::lexer(snippet).any(|t| t == Ok(Marker::OutToken))
}
