#![forbid(unsafe_code)]

mod lexer;
mod token;

pub use lexer::{LexError, Lexer};
pub use token::{Token, TokenKind};

#[cfg(test)]
mod tests {
	use super::*;

	fn kinds(src: &str) -> Vec<TokenKind> {
		Lexer::new(src)
			.lex()
			.unwrap()
			.into_iter()
			.map(|t| t.kind)
			.collect()
	}

	#[test]
	fn lex_int_literals_with_bases_and_underscores() {
		let src = "val a = 1_000\nval b = 0b1010_0110\nval c = 0o755\nval d = 0xDEAD_BEEF\n";
		let ints: Vec<u64> = kinds(src)
			.into_iter()
			.filter_map(|k| match k {
				TokenKind::Int(n) => Some(n),
				_ => None,
			})
			.collect();
		assert_eq!(ints, vec![1000, 0b1010_0110, 0o755, 0xDEAD_BEEF]);
	}

	#[test]
	fn lex_rejects_bad_int_underscore_placement() {
		let err = Lexer::new("val x = 0x_DEAD\n").lex().unwrap_err();
		assert!(err.message.contains("invalid integer literal"));
	}

	#[test]
	fn lex_char_literals_and_escapes() {
		let chars: Vec<char> = kinds("val a = {'a', '\\n', '\\'', '#', '\\u{41}'}\n")
			.into_iter()
			.filter_map(|k| match k {
				TokenKind::Char(c) => Some(c),
				_ => None,
			})
			.collect();
		assert_eq!(chars, vec!['a', '\n', '\'', '#', 'A']);
	}

	#[test]
	fn lex_comment_markers_inside_literals_are_kept() {
		let ks = kinds("val s = \"a # b // c\" # trailing\n");
		assert!(ks.contains(&TokenKind::String("a # b // c".to_string())));
		assert_eq!(ks.iter().filter(|k| **k == TokenKind::Newline).count(), 1);
	}

	#[test]
	fn lex_rejects_unknown_string_escape() {
		let err = Lexer::new("val s = \"\\q\"\n").lex().unwrap_err();
		assert!(err.message.contains("invalid string literal"));
	}

	#[test]
	fn lex_expansion_heading() {
		let ks = kinds("expand val base = xs; val mut x in base:\n    print(x)\n");
		assert_eq!(ks[0], TokenKind::KwExpand);
		assert!(ks.contains(&TokenKind::Semi));
		assert!(ks.contains(&TokenKind::KwIn));
		assert!(ks.contains(&TokenKind::Indent));
		assert!(ks.contains(&TokenKind::Dedent));
	}

	#[test]
	fn lex_brackets_continue_logical_line() {
		let src = "type P = record {\n    x: int,\n    y: int,\n}\nval z = 1\n";
		let ks = kinds(src);
		assert!(!ks.contains(&TokenKind::Indent));
		assert_eq!(ks.iter().filter(|k| **k == TokenKind::Newline).count(), 2);
	}

	#[test]
	fn lex_rejects_unbalanced_brackets() {
		let err = Lexer::new("val x = (1\n").lex().unwrap_err();
		assert!(err.message.contains("unclosed bracket"));
		let err = Lexer::new("val x = 1)\n").lex().unwrap_err();
		assert!(err.message.contains("unbalanced"));
	}
}
