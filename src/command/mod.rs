//! Command line handling.
//!
//! A line typed by the user is split into `word` / `word_eol`, then offered
//! in turn to registered hooks, user-defined commands, and the builtins.
//! Anything left over goes to the server as a raw line.

mod builtins;

use std::collections::HashMap;

use chrono::Local;

use crate::error::CommandError;

/// Longest expansion of a user command.
pub const MAX_EXPANSION: usize = 2048;

/// How deeply user commands may call each other.
pub const MAX_DEPTH: usize = 8;

/// Most words a line is split into.
const MAX_WORDS: usize = 32;

/// A split command line. `word[0]` is the command without its `/`;
/// `word_eol[i]` is the raw text from `word[i]` to the end.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Words {
    pub word: Vec<String>,
    pub word_eol: Vec<String>,
}

impl Words {
    /// Word `i`, or `""`.
    pub fn word(&self, i: usize) -> &str {
        self.word.get(i).map(String::as_str).unwrap_or_default()
    }

    /// The rest of the line from word `i`, or `""`.
    pub fn eol(&self, i: usize) -> &str {
        self.word_eol.get(i).map(String::as_str).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.word.len()
    }

    pub fn is_empty(&self) -> bool {
        self.word.is_empty()
    }
}

/// Split on spaces. A word starting with `"` runs to the closing quote and
/// loses the quotes; `word_eol` keeps the raw text.
pub fn split_words(line: &str) -> Words {
    let mut words = Words::default();
    let bytes = line.as_bytes();
    let mut i = 0;

    while i < bytes.len() && words.word.len() < MAX_WORDS {
        while i < bytes.len() && bytes[i] == b' ' {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }
        let start = i;
        let word = if bytes[i] == b'"' {
            match line[i + 1..].find('"') {
                Some(end) => {
                    i = i + 1 + end + 1;
                    line[start + 1..start + 1 + end].to_owned()
                }
                None => {
                    i = bytes.len();
                    line[start + 1..].to_owned()
                }
            }
        } else {
            while i < bytes.len() && bytes[i] != b' ' {
                i += 1;
            }
            line[start..i].to_owned()
        };
        words.word.push(word);
        words.word_eol.push(line[start..].to_owned());
    }
    words
}

/// Whether a hook consumed a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Eat {
    None,
    All,
}

/// A command handler registered at runtime.
pub trait CommandHook: Send {
    fn call(&mut self, words: &Words) -> Eat;
}

impl<F> CommandHook for F
where
    F: FnMut(&Words) -> Eat + Send,
{
    fn call(&mut self, words: &Words) -> Eat {
        self(words)
    }
}

/// Hooks by upper-cased command name, in registration order.
#[derive(Default)]
pub struct HookRegistry {
    hooks: HashMap<String, Vec<Box<dyn CommandHook>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, hook: impl CommandHook + 'static) {
        self.hooks
            .entry(name.to_ascii_uppercase())
            .or_default()
            .push(Box::new(hook));
    }

    /// Run the hooks for `words.word[0]` until one eats it.
    pub fn dispatch(&mut self, words: &Words) -> Eat {
        let Some(hooks) = self.hooks.get_mut(&words.word(0).to_ascii_uppercase()) else {
            return Eat::None;
        };
        for hook in hooks {
            if hook.call(words) == Eat::All {
                return Eat::All;
            }
        }
        Eat::None
    }
}

/// What `%` codes in a user command expand to.
#[derive(Clone, Debug, Default)]
pub struct ExpandContext<'a> {
    pub channel: &'a str,
    pub nick: &'a str,
    pub server: &'a str,
    pub network: &'a str,
}

/// Substitute `%c %n %s %e %v %t %d %1..%9 &1..&9 %%` in `body`.
pub fn expand_user_command(
    body: &str,
    ctx: &ExpandContext<'_>,
    words: &Words,
) -> Result<String, CommandError> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        let next = chars.peek().copied();
        let piece: Option<String> = match (c, next) {
            ('%', Some('%')) => Some(String::from("%")),
            ('%', Some('c')) => Some(ctx.channel.to_owned()),
            ('%', Some('n')) => Some(ctx.nick.to_owned()),
            ('%', Some('s')) => Some(ctx.server.to_owned()),
            ('%', Some('e')) => Some(ctx.network.to_owned()),
            ('%', Some('v')) => Some(crate::VERSION.to_owned()),
            ('%', Some('t')) => Some(Local::now().format("%H:%M:%S").to_string()),
            ('%', Some('d')) => Some(Local::now().format("%Y-%m-%d").to_string()),
            ('%', Some(d @ '1'..='9')) => Some(words.word(digit(d)).to_owned()),
            ('&', Some(d @ '1'..='9')) => Some(words.eol(digit(d)).to_owned()),
            _ => None,
        };
        match piece {
            Some(text) => {
                chars.next();
                out.push_str(&text);
            }
            None => out.push(c),
        }
        if out.len() > MAX_EXPANSION {
            return Err(CommandError::ExpansionTooLong(MAX_EXPANSION));
        }
    }
    Ok(out)
}

/// `%1` is the command itself, `%2` its first argument.
fn digit(c: char) -> usize {
    (c.to_digit(10).unwrap_or(1) as usize).saturating_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_words() {
        let w = split_words("msg  bob hello  there");
        assert_eq!(w.word, ["msg", "bob", "hello", "there"]);
        assert_eq!(w.eol(2), "hello  there");
        assert_eq!(w.word(9), "");
    }

    #[test]
    fn test_split_quoted() {
        let w = split_words("dcc send bob \"my file.txt\" extra");
        assert_eq!(w.word(3), "my file.txt");
        assert_eq!(w.eol(3), "\"my file.txt\" extra");
        assert_eq!(w.word(4), "extra");
    }

    #[test]
    fn test_expand_codes() {
        let ctx = ExpandContext {
            channel: "#rust",
            nick: "me",
            server: "irc.example.net",
            network: "Example",
        };
        let words = split_words("j #a key here");
        let out = expand_user_command("join %2 &3 on %s/%e as %n in %c %%1", &ctx, &words).unwrap();
        assert_eq!(out, "join #a key here on irc.example.net/Example as me in #rust %1");
    }

    #[test]
    fn test_expansion_bounded() {
        let words = split_words(&format!("x {}", "y".repeat(1000)));
        let body = "%2%2%2";
        let err = expand_user_command(body, &ExpandContext::default(), &words).unwrap_err();
        assert!(matches!(err, CommandError::ExpansionTooLong(_)));
    }

    #[test]
    fn test_hooks_eat() {
        let mut reg = HookRegistry::new();
        reg.register("hello", |_: &Words| Eat::None);
        reg.register("HELLO", |w: &Words| if w.word(1) == "stop" { Eat::All } else { Eat::None });
        assert_eq!(reg.dispatch(&split_words("hello stop")), Eat::All);
        assert_eq!(reg.dispatch(&split_words("Hello go")), Eat::None);
        assert_eq!(reg.dispatch(&split_words("other")), Eat::None);
    }
}
