#[cfg(test)]
mod lexer_tests {
    use crate::error::ErrorKind;
    use crate::lexer::token::TokenKind;
    use crate::lexer::tokenize;

    fn lex_ok(input: &str) -> Vec<TokenKind> {
        match tokenize(input) {
            Ok(tokens) => tokens.into_iter().map(|t| t.kind).collect(),
            Err(e) => panic!("unexpected lex error: {:?}", e),
        }
    }

    fn lex_err(input: &str) -> ErrorKind {
        match tokenize(input) {
            Ok(tokens) => panic!("expected a lex error, got tokens: {:?}", tokens),
            Err(e) => e.kind,
        }
    }

    #[test]
    fn empty_input() {
        assert_eq!(lex_ok(""), vec![]);
    }

    #[test]
    fn block_comment_is_skipped() {
        assert_eq!(lex_ok("/* comment */ START END"), vec![TokenKind::Start, TokenKind::End]);
    }

    #[test]
    fn nested_block_comments() {
        assert_eq!(lex_ok("/* outer /* inner */ still outer */ START"), vec![TokenKind::Start]);
    }

    #[test]
    fn unterminated_block_comment() {
        assert_eq!(lex_err("/* never closed"), ErrorKind::UnterminatedComment);
    }

    #[test]
    fn keywords_and_punctuation() {
        let kinds = lex_ok("int x := 5; bool flag; int[] arr;");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Int,
                TokenKind::Identifier("x".into()),
                TokenKind::Assign,
                TokenKind::Number(5),
                TokenKind::Semicolon,
                TokenKind::Bool,
                TokenKind::Identifier("flag".into()),
                TokenKind::Semicolon,
                TokenKind::IntArray,
                TokenKind::Identifier("arr".into()),
                TokenKind::Semicolon,
            ]
        );
    }

    #[test]
    fn eq_and_assign_are_distinct() {
        assert_eq!(lex_ok("="), vec![TokenKind::Eq]);
        assert_eq!(lex_ok(":="), vec![TokenKind::Assign]);
    }

    #[test]
    fn relational_and_logical_operators() {
        assert_eq!(
            lex_ok("== != < <= > >= && ||"),
            vec![
                TokenKind::EqEq,
                TokenKind::NotEq,
                TokenKind::Less,
                TokenKind::LessEq,
                TokenKind::Greater,
                TokenKind::GreaterEq,
                TokenKind::AndAnd,
                TokenKind::OrOr,
            ]
        );
    }

    #[test]
    fn identifier_at_length_limit_is_accepted() {
        let name = "a".repeat(16);
        assert_eq!(lex_ok(&name), vec![TokenKind::Identifier(name)]);
    }

    #[test]
    fn identifier_over_length_limit_is_rejected() {
        let name = "a".repeat(17);
        assert_eq!(lex_err(&name), ErrorKind::IdentifierTooLong);
    }

    #[test]
    fn number_overflowing_i32_is_rejected() {
        assert_eq!(lex_err("99999999999999999999"), ErrorKind::NumberTooLong);
    }

    #[test]
    fn unknown_character_is_rejected() {
        assert_eq!(lex_err("@"), ErrorKind::UnknownCharacter);
    }

    #[test]
    fn keyword_not_confused_with_longer_identifier() {
        assert_eq!(lex_ok("intx"), vec![TokenKind::Identifier("intx".into())]);
    }

    #[test]
    fn true_false_literals() {
        assert_eq!(lex_ok("true false"), vec![TokenKind::True, TokenKind::False]);
    }

    #[test]
    fn ternary_and_instanceof_tokens() {
        assert_eq!(
            lex_ok("x # y : z instanceof int"),
            vec![
                TokenKind::Identifier("x".into()),
                TokenKind::Hash,
                TokenKind::Identifier("y".into()),
                TokenKind::Colon,
                TokenKind::Identifier("z".into()),
                TokenKind::Instanceof,
                TokenKind::Int,
            ]
        );
    }
}
