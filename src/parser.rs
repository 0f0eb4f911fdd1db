use crate::ast::{
    Ast, BinaryOp, CostumeDecl, EventScript, EventType, Expr, Item, ListDecl, MathOp, Position,
    Procedure, ReporterKind, Statement, UnaryOp, VariableDecl,
};
use crate::error::CompileError;
use crate::lexer::{Lexer, Token, TokenType};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
    pub pos: Position,
}

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (line {}, column {})",
            self.message, self.pos.line, self.pos.column
        )
    }
}

impl Error for ParseError {}

impl From<ParseError> for CompileError {
    fn from(err: ParseError) -> Self {
        CompileError::Syntax {
            message: err.message,
            pos: err.pos,
        }
    }
}

/// Parses one source unit into its AST.
pub fn parse(source: &str) -> Result<Ast, CompileError> {
    let tokens = Lexer::new(source).tokenize()?;
    let ast = Parser::new(tokens).parse_unit()?;
    Ok(ast)
}

pub struct Parser {
    tokens: Vec<Token>,
    index: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, index: 0 }
    }

    pub fn parse_unit(&mut self) -> Result<Ast, ParseError> {
        let mut items = Vec::new();
        loop {
            self.skip_newlines();
            if self.at_end() {
                break;
            }
            if self.match_keyword("costume") {
                let pos = self.previous().pos;
                let path_token =
                    self.consume_type(TokenType::String, "Expected costume path string.")?;
                items.push(Item::Costume(CostumeDecl {
                    pos,
                    path: path_token.value,
                }));
                continue;
            }
            if self.match_keyword("var") {
                let pos = self.previous().pos;
                let name = self.parse_decl_name_token()?;
                items.push(Item::Variable(VariableDecl { pos, name }));
                continue;
            }
            if self.match_keyword("list") {
                let pos = self.previous().pos;
                let name = self.parse_decl_name_token()?;
                items.push(Item::List(ListDecl { pos, name }));
                continue;
            }
            if self.match_keyword("define") {
                let pos = self.previous().pos;
                items.push(Item::Procedure(self.parse_procedure(pos)?));
                continue;
            }
            if self.match_keyword("when") {
                let pos = self.previous().pos;
                items.push(Item::Event(self.parse_event_script(pos)?));
                continue;
            }
            return self
                .error_here("Expected 'costume', 'var', 'list', 'define', or 'when' at top level.");
        }
        Ok(Ast { items })
    }

    fn parse_procedure(&mut self, pos: Position) -> Result<Procedure, ParseError> {
        let name = self.parse_name_token()?;
        let mut params = Vec::new();
        if self.match_type(TokenType::LParen) {
            if !self.check_type(TokenType::RParen) {
                loop {
                    params.push(self.parse_name_token()?);
                    if !self.match_type(TokenType::Comma) {
                        break;
                    }
                }
            }
            self.consume_type(TokenType::RParen, "Expected ')' after parameter list.")?;
        }
        self.skip_newlines();
        let body = self.parse_statement_block(&["end"])?;
        self.consume_keyword("end", "Expected 'end' to close function definition.")?;
        Ok(Procedure {
            pos,
            name,
            params,
            body,
        })
    }

    fn parse_event_script(&mut self, pos: Position) -> Result<EventScript, ParseError> {
        let event = if self.match_keyword("flag") {
            self.consume_keyword("clicked", "Expected 'clicked' after 'when flag'.")?;
            EventType::FlagClicked
        } else if self.match_keyword("this") {
            self.consume_keyword("sprite", "Expected 'sprite' in 'when this sprite clicked'.")?;
            self.consume_keyword("clicked", "Expected 'clicked' in 'when this sprite clicked'.")?;
            EventType::SpriteClicked
        } else if self.match_keyword("i") {
            self.consume_keyword("receive", "Expected 'receive' after 'when i'.")?;
            let message = self.parse_bracket_text()?;
            if message.is_empty() {
                return self.error_here("Broadcast message cannot be empty.");
            }
            EventType::MessageReceived(message)
        } else {
            return self.error_here("Unknown event header after 'when'.");
        };
        self.skip_newlines();
        let body =
            self.parse_statement_block(&["when", "define", "var", "list", "costume", "end"])?;
        if self.check_keyword("end") {
            self.advance();
        }
        Ok(EventScript { pos, event, body })
    }

    fn parse_statement_block(&mut self, until: &[&str]) -> Result<Vec<Statement>, ParseError> {
        let end_set: HashSet<&str> = until.iter().copied().collect();
        let mut statements = Vec::new();
        loop {
            self.skip_newlines();
            if self.at_end() {
                break;
            }
            let token = self.current();
            if token.typ == TokenType::Keyword && end_set.contains(token.value.as_str()) {
                break;
            }
            statements.push(self.parse_statement()?);
        }
        Ok(statements)
    }

    fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        if self.check_keyword("broadcast") {
            return self.parse_broadcast_stmt();
        }
        if self.check_keyword("set") {
            return self.parse_set_stmt();
        }
        if self.check_keyword("change") {
            return self.parse_change_stmt();
        }
        if self.check_keyword("move") {
            return self.parse_move_stmt();
        }
        if self.check_keyword("turn") {
            return self.parse_turn_stmt();
        }
        if self.check_keyword("go") {
            return self.parse_go_stmt();
        }
        if self.check_keyword("point") {
            return self.parse_point_stmt();
        }
        if self.check_keyword("say") {
            return self.parse_say_stmt();
        }
        if self.check_keyword("think") {
            let pos = self.advance().pos;
            let message = self.parse_wrapped_expression()?;
            return Ok(Statement::Think { pos, message });
        }
        if self.check_keyword("show") {
            let pos = self.advance().pos;
            return Ok(Statement::Show { pos });
        }
        if self.check_keyword("hide") {
            let pos = self.advance().pos;
            return Ok(Statement::Hide { pos });
        }
        if self.check_keyword("next") {
            let pos = self.advance().pos;
            self.consume_keyword("costume", "Expected 'costume' after 'next'.")?;
            return Ok(Statement::NextCostume { pos });
        }
        if self.check_keyword("switch") {
            let pos = self.advance().pos;
            self.consume_keyword("costume", "Expected 'costume' after 'switch'.")?;
            self.consume_keyword("to", "Expected 'to' in 'switch costume to'.")?;
            let costume = self.parse_wrapped_expression()?;
            return Ok(Statement::SwitchCostume { pos, costume });
        }
        if self.check_keyword("wait") {
            return self.parse_wait_stmt();
        }
        if self.check_keyword("repeat") {
            return self.parse_repeat_stmt();
        }
        if self.check_keyword("forever") {
            return self.parse_forever_stmt();
        }
        if self.check_keyword("if") {
            return self.parse_if_stmt();
        }
        if self.check_keyword("stop") {
            return self.parse_stop_stmt();
        }
        if self.check_keyword("ask") {
            let pos = self.advance().pos;
            let question = self.parse_wrapped_expression()?;
            self.consume_keyword("and", "Expected 'and wait' after ask question.")?;
            self.consume_keyword("wait", "Expected 'wait' in 'ask ... and wait'.")?;
            return Ok(Statement::Ask { pos, question });
        }
        if self.check_keyword("reset") {
            let pos = self.advance().pos;
            self.consume_keyword("timer", "Expected 'timer' after 'reset'.")?;
            return Ok(Statement::ResetTimer { pos });
        }
        if self.check_keyword("add") {
            let pos = self.advance().pos;
            let item = self.parse_wrapped_expression()?;
            self.consume_keyword("to", "Expected 'to' in list add statement.")?;
            let list = self.parse_name_token()?;
            return Ok(Statement::AddToList { pos, list, item });
        }
        if self.check_keyword("delete") {
            return self.parse_delete_stmt();
        }
        if self.check_keyword("insert") {
            let pos = self.advance().pos;
            let item = self.parse_wrapped_expression()?;
            self.consume_keyword("at", "Expected 'at' in list insert statement.")?;
            let index = self.parse_wrapped_expression()?;
            self.consume_keyword("of", "Expected 'of' in list insert statement.")?;
            let list = self.parse_name_token()?;
            return Ok(Statement::InsertAtList {
                pos,
                list,
                item,
                index,
            });
        }
        if self.check_keyword("replace") {
            let pos = self.advance().pos;
            self.consume_keyword("item", "Expected 'item' after 'replace'.")?;
            let index = self.parse_wrapped_expression()?;
            self.consume_keyword("of", "Expected 'of' in list replace statement.")?;
            let list = self.parse_name_token()?;
            self.consume_keyword("with", "Expected 'with' in list replace statement.")?;
            let item = self.parse_wrapped_expression()?;
            return Ok(Statement::ReplaceItemOfList {
                pos,
                list,
                index,
                item,
            });
        }
        if self.check_type(TokenType::Ident) {
            return self.parse_call_stmt();
        }
        self.error_here("Unknown statement.")
    }

    fn parse_broadcast_stmt(&mut self) -> Result<Statement, ParseError> {
        let pos = self.consume_keyword("broadcast", "Expected 'broadcast'.")?.pos;
        let wait = if self.match_keyword("and") {
            self.consume_keyword("wait", "Expected 'wait' after 'broadcast and'.")?;
            true
        } else {
            false
        };
        let message = self.parse_bracket_text()?;
        if message.is_empty() {
            return self.error_here("Broadcast message cannot be empty.");
        }
        if wait {
            return Ok(Statement::BroadcastAndWait { pos, message });
        }
        Ok(Statement::Broadcast { pos, message })
    }

    fn parse_set_stmt(&mut self) -> Result<Statement, ParseError> {
        let pos = self.consume_keyword("set", "Expected 'set'.")?.pos;
        if self.match_keyword("x") {
            self.consume_keyword("to", "Expected 'to' in 'set x to'.")?;
            let value = self.parse_wrapped_expression()?;
            return Ok(Statement::SetX { pos, value });
        }
        if self.match_keyword("y") {
            self.consume_keyword("to", "Expected 'to' in 'set y to'.")?;
            let value = self.parse_wrapped_expression()?;
            return Ok(Statement::SetY { pos, value });
        }
        let name = self.parse_name_token()?;
        self.consume_keyword("to", "Expected 'to' in set statement.")?;
        let value = self.parse_wrapped_expression()?;
        Ok(Statement::SetVar { pos, name, value })
    }

    fn parse_change_stmt(&mut self) -> Result<Statement, ParseError> {
        let pos = self.consume_keyword("change", "Expected 'change'.")?.pos;
        if self.match_keyword("x") {
            self.consume_keyword("by", "Expected 'by' in 'change x by'.")?;
            let value = self.parse_wrapped_expression()?;
            return Ok(Statement::ChangeX { pos, value });
        }
        if self.match_keyword("y") {
            self.consume_keyword("by", "Expected 'by' in 'change y by'.")?;
            let value = self.parse_wrapped_expression()?;
            return Ok(Statement::ChangeY { pos, value });
        }
        let name = self.parse_name_token()?;
        self.consume_keyword("by", "Expected 'by' in change statement.")?;
        let delta = self.parse_wrapped_expression()?;
        Ok(Statement::ChangeVar { pos, name, delta })
    }

    fn parse_move_stmt(&mut self) -> Result<Statement, ParseError> {
        let pos = self.consume_keyword("move", "Expected 'move'.")?.pos;
        let steps = self.parse_wrapped_expression()?;
        self.match_keyword("steps");
        Ok(Statement::Move { pos, steps })
    }

    fn parse_turn_stmt(&mut self) -> Result<Statement, ParseError> {
        let pos = self.consume_keyword("turn", "Expected 'turn'.")?.pos;
        if self.match_keyword("left") {
            let degrees = self.parse_wrapped_expression()?;
            return Ok(Statement::TurnLeft { pos, degrees });
        }
        if self.match_keyword("right") {
            let degrees = self.parse_wrapped_expression()?;
            return Ok(Statement::TurnRight { pos, degrees });
        }
        self.error_here("Expected 'left' or 'right' after 'turn'.")
    }

    fn parse_go_stmt(&mut self) -> Result<Statement, ParseError> {
        let pos = self.consume_keyword("go", "Expected 'go'.")?.pos;
        self.consume_keyword("to", "Expected 'to' after 'go'.")?;
        self.consume_keyword("x", "Expected 'x' in 'go to x (...) y (...)'.")?;
        let x = self.parse_wrapped_expression()?;
        self.consume_keyword("y", "Expected 'y' in 'go to x (...) y (...)'.")?;
        let y = self.parse_wrapped_expression()?;
        Ok(Statement::GoToXY { pos, x, y })
    }

    fn parse_point_stmt(&mut self) -> Result<Statement, ParseError> {
        let pos = self.consume_keyword("point", "Expected 'point'.")?.pos;
        self.consume_keyword("in", "Expected 'in' after 'point'.")?;
        self.consume_keyword("direction", "Expected 'direction' after 'point in'.")?;
        let direction = self.parse_wrapped_expression()?;
        Ok(Statement::PointInDirection { pos, direction })
    }

    fn parse_say_stmt(&mut self) -> Result<Statement, ParseError> {
        let pos = self.consume_keyword("say", "Expected 'say'.")?.pos;
        let message = self.parse_wrapped_expression()?;
        if self.match_keyword("for") {
            let duration = self.parse_wrapped_expression()?;
            self.consume_keyword("seconds", "Expected 'seconds' after say duration.")?;
            return Ok(Statement::SayForSeconds {
                pos,
                message,
                duration,
            });
        }
        Ok(Statement::Say { pos, message })
    }

    fn parse_wait_stmt(&mut self) -> Result<Statement, ParseError> {
        let pos = self.consume_keyword("wait", "Expected 'wait'.")?.pos;
        if self.match_keyword("until") {
            let condition = self.parse_wrapped_expression()?;
            return Ok(Statement::WaitUntil { pos, condition });
        }
        let duration = self.parse_wrapped_expression()?;
        Ok(Statement::Wait { pos, duration })
    }

    fn parse_repeat_stmt(&mut self) -> Result<Statement, ParseError> {
        let pos = self.consume_keyword("repeat", "Expected 'repeat'.")?.pos;
        if self.match_keyword("until") {
            let condition = self.parse_wrapped_expression()?;
            self.skip_newlines();
            let body = self.parse_statement_block(&["end"])?;
            self.consume_keyword("end", "Expected 'end' to close repeat-until block.")?;
            return Ok(Statement::RepeatUntil {
                pos,
                condition,
                body,
            });
        }
        let times = self.parse_wrapped_expression()?;
        self.skip_newlines();
        let body = self.parse_statement_block(&["end"])?;
        self.consume_keyword("end", "Expected 'end' to close repeat block.")?;
        Ok(Statement::Repeat { pos, times, body })
    }

    fn parse_forever_stmt(&mut self) -> Result<Statement, ParseError> {
        let pos = self.consume_keyword("forever", "Expected 'forever'.")?.pos;
        self.skip_newlines();
        let body = self.parse_statement_block(&["end"])?;
        self.consume_keyword("end", "Expected 'end' to close forever block.")?;
        Ok(Statement::Forever { pos, body })
    }

    fn parse_if_stmt(&mut self) -> Result<Statement, ParseError> {
        let pos = self.consume_keyword("if", "Expected 'if'.")?.pos;
        let condition = self.parse_wrapped_expression()?;
        self.consume_keyword("then", "Expected 'then' in if statement.")?;
        self.skip_newlines();
        let then_body = self.parse_statement_block(&["else", "end"])?;
        let mut else_body = Vec::new();
        if self.match_keyword("else") {
            self.skip_newlines();
            else_body = self.parse_statement_block(&["end"])?;
        }
        self.consume_keyword("end", "Expected 'end' to close if statement.")?;
        Ok(Statement::If {
            pos,
            condition,
            then_body,
            else_body,
        })
    }

    fn parse_stop_stmt(&mut self) -> Result<Statement, ParseError> {
        let pos = self.consume_keyword("stop", "Expected 'stop'.")?.pos;
        if self.match_keyword("all") {
            return Ok(Statement::StopAll { pos });
        }
        if self.match_keyword("this") {
            self.consume_keyword("script", "Expected 'script' in 'stop this script'.")?;
            return Ok(Statement::StopThisScript { pos });
        }
        self.error_here("Expected 'all' or 'this script' after 'stop'.")
    }

    fn parse_delete_stmt(&mut self) -> Result<Statement, ParseError> {
        let pos = self.consume_keyword("delete", "Expected 'delete'.")?.pos;
        if self.match_keyword("all") {
            self.consume_keyword("of", "Expected 'of' in 'delete all of <list>'.")?;
            let list = self.parse_name_token()?;
            return Ok(Statement::DeleteAllOfList { pos, list });
        }
        let index = self.parse_wrapped_expression()?;
        self.consume_keyword("of", "Expected 'of' in list delete statement.")?;
        let list = self.parse_name_token()?;
        Ok(Statement::DeleteOfList { pos, list, index })
    }

    fn parse_call_stmt(&mut self) -> Result<Statement, ParseError> {
        let token = self.consume_type(TokenType::Ident, "Expected function name.")?;
        let mut args = Vec::new();
        if self.match_type(TokenType::LParen) {
            if !self.check_type(TokenType::RParen) {
                loop {
                    args.push(self.parse_expression(&[TokenType::Comma, TokenType::RParen], 1)?);
                    if !self.match_type(TokenType::Comma) {
                        break;
                    }
                }
            }
            self.consume_type(TokenType::RParen, "Expected ')' after call arguments.")?;
        }
        Ok(Statement::Call {
            pos: token.pos,
            name: token.value,
            args,
        })
    }

    fn parse_wrapped_expression(&mut self) -> Result<Expr, ParseError> {
        self.consume_type(TokenType::LParen, "Expected '('.")?;
        let expr = self.parse_expression(&[TokenType::RParen], 1)?;
        self.consume_type(TokenType::RParen, "Expected ')' after expression.")?;
        Ok(expr)
    }

    fn parse_expression(
        &mut self,
        stop_types: &[TokenType],
        min_precedence: i32,
    ) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary(stop_types)?;
        loop {
            let token = self.current().clone();
            if stop_types.contains(&token.typ) {
                break;
            }
            let Some(op) = as_operator(&token) else {
                break;
            };
            let precedence = precedence_of(op);
            if precedence < min_precedence {
                break;
            }
            self.advance();
            let right = self.parse_expression(stop_types, precedence + 1)?;
            left = Expr::Binary {
                pos: token.pos,
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self, stop_types: &[TokenType]) -> Result<Expr, ParseError> {
        let token = self.current().clone();
        if token.typ == TokenType::Op && token.value == "-" {
            self.advance();
            let operand = self.parse_unary(stop_types)?;
            return Ok(Expr::Unary {
                pos: token.pos,
                op: UnaryOp::Minus,
                operand: Box::new(operand),
            });
        }
        if token.typ == TokenType::Keyword && token.value == "not" {
            self.advance();
            let operand = self.parse_unary(stop_types)?;
            return Ok(Expr::Unary {
                pos: token.pos,
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_primary(stop_types)
    }

    fn parse_primary(&mut self, stop_types: &[TokenType]) -> Result<Expr, ParseError> {
        let token = self.current().clone();
        if stop_types.contains(&token.typ) {
            return self.error_here("Expected expression.");
        }
        if self.check_keyword("pick") {
            let pos = self.advance().pos;
            self.consume_keyword("random", "Expected 'random' after 'pick'.")?;
            let low = self.parse_wrapped_expression()?;
            self.consume_keyword("to", "Expected 'to' in 'pick random (...) to (...)'.")?;
            let high = self.parse_wrapped_expression()?;
            return Ok(Expr::PickRandom {
                pos,
                low: Box::new(low),
                high: Box::new(high),
            });
        }
        if self.check_keyword("item") {
            let pos = self.advance().pos;
            let index = self.parse_wrapped_expression()?;
            self.consume_keyword("of", "Expected 'of' in 'item (...) of <list>'.")?;
            let list = self.parse_name_token()?;
            return Ok(Expr::ItemOfList {
                pos,
                list,
                index: Box::new(index),
            });
        }
        if self.check_keyword("length") {
            let pos = self.advance().pos;
            self.consume_keyword("of", "Expected 'of' in 'length of <list>'.")?;
            let list = self.parse_name_token()?;
            return Ok(Expr::LengthOfList { pos, list });
        }
        if self.check_keyword("key") {
            let pos = self.advance().pos;
            let key = self.parse_wrapped_expression()?;
            self.consume_keyword("pressed", "Expected 'pressed' in key sensing expression.")?;
            return Ok(Expr::KeyPressed {
                pos,
                key: Box::new(key),
            });
        }
        if self.check_keyword("round") {
            let pos = self.advance().pos;
            let value = self.parse_wrapped_expression()?;
            return Ok(Expr::MathFunc {
                pos,
                op: MathOp::Round,
                value: Box::new(value),
            });
        }
        for (keyword, op) in [
            ("abs", MathOp::Abs),
            ("floor", MathOp::Floor),
            ("ceiling", MathOp::Ceiling),
            ("sqrt", MathOp::Sqrt),
        ] {
            if self.check_keyword(keyword) {
                let pos = self.advance().pos;
                self.consume_keyword("of", "Expected 'of' after math function name.")?;
                let value = self.parse_wrapped_expression()?;
                return Ok(Expr::MathFunc {
                    pos,
                    op,
                    value: Box::new(value),
                });
            }
        }
        if self.check_keyword("timer") {
            let pos = self.advance().pos;
            return Ok(Expr::Reporter {
                pos,
                kind: ReporterKind::Timer,
            });
        }
        if self.check_keyword("answer") {
            let pos = self.advance().pos;
            return Ok(Expr::Reporter {
                pos,
                kind: ReporterKind::Answer,
            });
        }
        if self.check_keyword("mouse") {
            let pos = self.advance().pos;
            if self.match_keyword("x") {
                return Ok(Expr::Reporter {
                    pos,
                    kind: ReporterKind::MouseX,
                });
            }
            if self.match_keyword("y") {
                return Ok(Expr::Reporter {
                    pos,
                    kind: ReporterKind::MouseY,
                });
            }
            return self.error_here("Expected 'x' or 'y' after 'mouse'.");
        }
        if self.check_keyword("x") {
            let pos = self.advance().pos;
            self.consume_keyword("position", "Expected 'position' after 'x'.")?;
            return Ok(Expr::Reporter {
                pos,
                kind: ReporterKind::XPosition,
            });
        }
        if self.check_keyword("y") {
            let pos = self.advance().pos;
            self.consume_keyword("position", "Expected 'position' after 'y'.")?;
            return Ok(Expr::Reporter {
                pos,
                kind: ReporterKind::YPosition,
            });
        }
        if token.typ == TokenType::Number {
            self.advance();
            let value = token.value.parse::<f64>().unwrap_or(0.0);
            return Ok(Expr::Number {
                pos: token.pos,
                value,
            });
        }
        if token.typ == TokenType::String {
            self.advance();
            return Ok(Expr::Str {
                pos: token.pos,
                value: token.value,
            });
        }
        if token.typ == TokenType::Ident {
            if self.peek().typ == TokenType::LParen {
                return Err(ParseError {
                    message: format!(
                        "Function call '{}' cannot appear inside an expression.",
                        token.value
                    ),
                    pos: token.pos,
                });
            }
            self.advance();
            if self.check_keyword("contains") {
                self.advance();
                let item = self.parse_wrapped_expression()?;
                return Ok(Expr::ListContains {
                    pos: token.pos,
                    list: token.value,
                    item: Box::new(item),
                });
            }
            return Ok(Expr::Ident {
                pos: token.pos,
                name: token.value,
            });
        }
        if token.typ == TokenType::LParen {
            self.advance();
            let expr = self.parse_expression(&[TokenType::RParen], 1)?;
            self.consume_type(TokenType::RParen, "Expected ')' after grouped expression.")?;
            return Ok(expr);
        }
        self.error_here("Expected expression.")
    }

    fn parse_bracket_text(&mut self) -> Result<String, ParseError> {
        self.consume_type(TokenType::LBracket, "Expected '['.")?;
        let mut parts = Vec::new();
        while !self.at_end() && !self.check_type(TokenType::RBracket) {
            if self.check_type(TokenType::Newline) {
                return self.error_here("Unexpected newline in bracket text.");
            }
            parts.push(self.advance().value);
        }
        self.consume_type(TokenType::RBracket, "Expected ']'.")?;
        Ok(parts.join(" ").trim().to_string())
    }

    fn parse_name_token(&mut self) -> Result<String, ParseError> {
        let token = self.current().clone();
        if token.typ == TokenType::Ident || token.typ == TokenType::String {
            self.advance();
            return Ok(token.value);
        }
        self.error_here("Expected name.")
    }

    fn parse_decl_name_token(&mut self) -> Result<String, ParseError> {
        let token = self.current().clone();
        if token.typ == TokenType::Ident
            || token.typ == TokenType::String
            || token.typ == TokenType::Keyword
        {
            self.advance();
            return Ok(token.value);
        }
        self.error_here("Expected name.")
    }

    fn check_keyword(&self, keyword: &str) -> bool {
        let token = self.current();
        token.typ == TokenType::Keyword && token.value == keyword
    }

    fn consume_keyword(&mut self, keyword: &str, message: &str) -> Result<Token, ParseError> {
        let token = self.current().clone();
        if token.typ == TokenType::Keyword && token.value == keyword {
            self.advance();
            Ok(token)
        } else {
            Err(ParseError {
                message: message.to_string(),
                pos: token.pos,
            })
        }
    }

    fn consume_type(&mut self, typ: TokenType, message: &str) -> Result<Token, ParseError> {
        let token = self.current().clone();
        if token.typ == typ {
            self.advance();
            Ok(token)
        } else {
            Err(ParseError {
                message: message.to_string(),
                pos: token.pos,
            })
        }
    }

    fn match_keyword(&mut self, keyword: &str) -> bool {
        if self.check_keyword(keyword) {
            self.advance();
            return true;
        }
        false
    }

    fn match_type(&mut self, typ: TokenType) -> bool {
        if self.check_type(typ) {
            self.advance();
            return true;
        }
        false
    }

    fn check_type(&self, typ: TokenType) -> bool {
        self.current().typ == typ
    }

    fn skip_newlines(&mut self) {
        while self.check_type(TokenType::Newline) {
            self.advance();
        }
    }

    fn at_end(&self) -> bool {
        self.current().typ == TokenType::Eof
    }

    fn current(&self) -> &Token {
        &self.tokens[self.index]
    }

    fn peek(&self) -> &Token {
        if self.index + 1 >= self.tokens.len() {
            &self.tokens[self.tokens.len() - 1]
        } else {
            &self.tokens[self.index + 1]
        }
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.index - 1]
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.index].clone();
        self.index += 1;
        token
    }

    fn error_here<T: Into<String>, R>(&self, message: T) -> Result<R, ParseError> {
        Err(ParseError {
            message: message.into(),
            pos: self.current().pos,
        })
    }
}

fn as_operator(token: &Token) -> Option<BinaryOp> {
    if token.typ == TokenType::Op {
        return match token.value.as_str() {
            "+" => Some(BinaryOp::Add),
            "-" => Some(BinaryOp::Sub),
            "*" => Some(BinaryOp::Mul),
            "/" => Some(BinaryOp::Div),
            "%" => Some(BinaryOp::Mod),
            "<" => Some(BinaryOp::Lt),
            "<=" => Some(BinaryOp::Le),
            ">" => Some(BinaryOp::Gt),
            ">=" => Some(BinaryOp::Ge),
            "=" | "==" => Some(BinaryOp::Eq),
            "!=" => Some(BinaryOp::Ne),
            _ => None,
        };
    }
    if token.typ == TokenType::Keyword {
        return match token.value.as_str() {
            "and" => Some(BinaryOp::And),
            "or" => Some(BinaryOp::Or),
            _ => None,
        };
    }
    None
}

fn precedence_of(op: BinaryOp) -> i32 {
    match op {
        BinaryOp::Or => 1,
        BinaryOp::And => 2,
        BinaryOp::Lt
        | BinaryOp::Le
        | BinaryOp::Gt
        | BinaryOp::Ge
        | BinaryOp::Eq
        | BinaryOp::Ne => 3,
        BinaryOp::Add | BinaryOp::Sub => 4,
        BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Ast {
        parse(source).unwrap()
    }

    #[test]
    fn parses_declarations_and_scripts() {
        let ast = parse_ok(
            "costume \"cat.svg\"\nvar score\nlist inventory\n\nwhen flag clicked\n  set score to (0)\nend\n",
        );
        assert_eq!(ast.items.len(), 4);
        assert!(matches!(ast.items[0], Item::Costume(_)));
        assert!(matches!(ast.items[1], Item::Variable(_)));
        assert!(matches!(ast.items[2], Item::List(_)));
        let Item::Event(script) = &ast.items[3] else {
            panic!("expected event script");
        };
        assert!(matches!(script.event, EventType::FlagClicked));
        assert_eq!(script.body.len(), 1);
    }

    #[test]
    fn parses_procedure_with_params() {
        let ast = parse_ok("define greet(name, times)\n  repeat (times)\n    say (name)\n  end\nend\n");
        let Item::Procedure(procedure) = &ast.items[0] else {
            panic!("expected procedure");
        };
        assert_eq!(procedure.name, "greet");
        assert_eq!(procedure.params, vec!["name", "times"]);
        assert!(matches!(procedure.body[0], Statement::Repeat { .. }));
    }

    #[test]
    fn event_script_end_is_optional() {
        let ast = parse_ok("when i receive [go]\nwhen this sprite clicked\n  hide\nend\n");
        assert_eq!(ast.items.len(), 2);
        let Item::Event(first) = &ast.items[0] else {
            panic!("expected event script");
        };
        assert!(matches!(first.event, EventType::MessageReceived(ref m) if m == "go"));
        assert!(first.body.is_empty());
    }

    #[test]
    fn if_else_bodies() {
        let ast = parse_ok("when flag clicked\n  if (1 < 2) then\n    show\n  else\n    hide\n  end\nend\n");
        let Item::Event(script) = &ast.items[0] else {
            panic!("expected event script");
        };
        let Statement::If {
            then_body,
            else_body,
            ..
        } = &script.body[0]
        else {
            panic!("expected if statement");
        };
        assert_eq!(then_body.len(), 1);
        assert_eq!(else_body.len(), 1);
    }

    #[test]
    fn operator_precedence() {
        let ast = parse_ok("when flag clicked\n  set total to (1 + 2 * 3)\nend\n");
        let Item::Event(script) = &ast.items[0] else {
            panic!("expected event script");
        };
        let Statement::SetVar { value, .. } = &script.body[0] else {
            panic!("expected set statement");
        };
        let Expr::Binary { op, right, .. } = value else {
            panic!("expected binary expression");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(**right, Expr::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn call_with_arguments() {
        let ast = parse_ok("when flag clicked\n  greet(\"hi\", 3)\nend\n");
        let Item::Event(script) = &ast.items[0] else {
            panic!("expected event script");
        };
        let Statement::Call { name, args, .. } = &script.body[0] else {
            panic!("expected call statement");
        };
        assert_eq!(name, "greet");
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn list_contains_expression() {
        let ast = parse_ok("when flag clicked\n  if (inventory contains (\"key\")) then\n    show\n  end\nend\n");
        let Item::Event(script) = &ast.items[0] else {
            panic!("expected event script");
        };
        let Statement::If { condition, .. } = &script.body[0] else {
            panic!("expected if statement");
        };
        assert!(matches!(condition, Expr::ListContains { list, .. } if list == "inventory"));
    }

    #[test]
    fn syntax_error_carries_position() {
        let err = parse("when flag clicked\n  turn around (90)\nend\n").unwrap_err();
        let CompileError::Syntax { pos, .. } = err else {
            panic!("expected syntax error");
        };
        assert_eq!(pos.line, 2);
    }

    #[test]
    fn rejects_unknown_top_level_item() {
        let err = parse("move (10)\n").unwrap_err();
        assert!(matches!(err, CompileError::Syntax { .. }));
    }
}
