use crate::ast::{
    Ast, BinaryOp, EventType, Expr, Item, MathOp, Position, ReporterKind, Statement, UnaryOp,
};
use crate::error::CompileError;
use crate::ir::{Block, Field, Hat, Input, Script};
use crate::symbols::{FunctionSignature, Symbol, SymbolTable};
use std::collections::HashSet;

/// Pass 2: lowers a unit's executable constructs into scripts of target
/// blocks. `stage` is the Stage's frozen table, present for ordinary units
/// only; identifiers resolve against the local table first, then the Stage.
/// Function calls resolve locally only, because the target format has no
/// cross-unit invocation.
pub fn lower(
    ast: &Ast,
    local: &SymbolTable,
    stage: Option<&SymbolTable>,
) -> Result<Vec<Script>, CompileError> {
    let lowerer = Lowerer { local, stage };
    let mut scripts = Vec::new();
    for item in &ast.items {
        match item {
            Item::Costume(_) | Item::Variable(_) | Item::List(_) => {}
            Item::Procedure(procedure) => {
                let params: HashSet<String> = procedure
                    .params
                    .iter()
                    .map(|param| param.to_lowercase())
                    .collect();
                let body = lowerer.lower_statements(&procedure.body, &params)?;
                scripts.push(Script {
                    hat: Hat::FunctionDefinition {
                        name: procedure.name.clone(),
                        params: procedure.params.clone(),
                    },
                    body,
                });
            }
            Item::Event(script) => {
                let hat = match &script.event {
                    EventType::FlagClicked => Hat::FlagClicked,
                    EventType::SpriteClicked => Hat::SpriteClicked,
                    EventType::MessageReceived(message) => {
                        Hat::BroadcastReceived(message.clone())
                    }
                };
                let body = lowerer.lower_statements(&script.body, &HashSet::new())?;
                scripts.push(Script { hat, body });
            }
        }
    }
    Ok(scripts)
}

struct Lowerer<'a> {
    local: &'a SymbolTable,
    stage: Option<&'a SymbolTable>,
}

impl<'a> Lowerer<'a> {
    fn lower_statements(
        &self,
        statements: &[Statement],
        params: &HashSet<String>,
    ) -> Result<Vec<Block>, CompileError> {
        statements
            .iter()
            .map(|stmt| self.lower_statement(stmt, params))
            .collect()
    }

    fn lower_statement(
        &self,
        stmt: &Statement,
        params: &HashSet<String>,
    ) -> Result<Block, CompileError> {
        match stmt {
            Statement::Broadcast { message, .. } => Ok(op(
                "event_broadcast",
                vec![("BROADCAST_INPUT", Input::Broadcast(message.clone()))],
                vec![],
            )),
            Statement::BroadcastAndWait { message, .. } => Ok(op(
                "event_broadcastandwait",
                vec![("BROADCAST_INPUT", Input::Broadcast(message.clone()))],
                vec![],
            )),
            Statement::SetVar {
                name, value, pos, ..
            } => {
                let target = self.variable_target(name, *pos, params)?;
                let value = self.lower_expr(value, params)?;
                Ok(op(
                    "data_setvariableto",
                    vec![("VALUE", value)],
                    vec![("VARIABLE", Field::Variable(target))],
                ))
            }
            Statement::ChangeVar {
                name, delta, pos, ..
            } => {
                let target = self.variable_target(name, *pos, params)?;
                let delta = self.lower_expr(delta, params)?;
                Ok(op(
                    "data_changevariableby",
                    vec![("VALUE", delta)],
                    vec![("VARIABLE", Field::Variable(target))],
                ))
            }
            Statement::SetX { value, .. } => self.single_input("motion_setx", "X", value, params),
            Statement::SetY { value, .. } => self.single_input("motion_sety", "Y", value, params),
            Statement::ChangeX { value, .. } => {
                self.single_input("motion_changexby", "DX", value, params)
            }
            Statement::ChangeY { value, .. } => {
                self.single_input("motion_changeyby", "DY", value, params)
            }
            Statement::Move { steps, .. } => {
                self.single_input("motion_movesteps", "STEPS", steps, params)
            }
            Statement::TurnLeft { degrees, .. } => {
                self.single_input("motion_turnleft", "DEGREES", degrees, params)
            }
            Statement::TurnRight { degrees, .. } => {
                self.single_input("motion_turnright", "DEGREES", degrees, params)
            }
            Statement::GoToXY { x, y, .. } => {
                let x = self.lower_expr(x, params)?;
                let y = self.lower_expr(y, params)?;
                Ok(op("motion_gotoxy", vec![("X", x), ("Y", y)], vec![]))
            }
            Statement::PointInDirection { direction, .. } => {
                self.single_input("motion_pointindirection", "DIRECTION", direction, params)
            }
            Statement::Say { message, .. } => {
                self.single_input("looks_say", "MESSAGE", message, params)
            }
            Statement::SayForSeconds {
                message, duration, ..
            } => {
                let message = self.lower_expr(message, params)?;
                let duration = self.lower_expr(duration, params)?;
                Ok(op(
                    "looks_sayforsecs",
                    vec![("MESSAGE", message), ("SECS", duration)],
                    vec![],
                ))
            }
            Statement::Think { message, .. } => {
                self.single_input("looks_think", "MESSAGE", message, params)
            }
            Statement::Show { .. } => Ok(op("looks_show", vec![], vec![])),
            Statement::Hide { .. } => Ok(op("looks_hide", vec![], vec![])),
            Statement::NextCostume { .. } => Ok(op("looks_nextcostume", vec![], vec![])),
            Statement::SwitchCostume { costume, .. } => {
                let input = match costume {
                    Expr::Str { value, .. } => Input::Menu {
                        opcode: "looks_costume",
                        field: "COSTUME",
                        value: value.clone(),
                    },
                    Expr::Number { value, .. } => Input::Menu {
                        opcode: "looks_costume",
                        field: "COSTUME",
                        value: format_costume_number(*value),
                    },
                    other => self.lower_expr(other, params)?,
                };
                Ok(op("looks_switchcostumeto", vec![("COSTUME", input)], vec![]))
            }
            Statement::Wait { duration, .. } => {
                self.single_input("control_wait", "DURATION", duration, params)
            }
            Statement::WaitUntil { condition, .. } => {
                self.single_input("control_wait_until", "CONDITION", condition, params)
            }
            Statement::Repeat { times, body, .. } => {
                let times = self.lower_expr(times, params)?;
                let body = self.lower_statements(body, params)?;
                Ok(op(
                    "control_repeat",
                    vec![("TIMES", times), ("SUBSTACK", Input::Substack(body))],
                    vec![],
                ))
            }
            Statement::RepeatUntil {
                condition, body, ..
            } => {
                let condition = self.lower_expr(condition, params)?;
                let body = self.lower_statements(body, params)?;
                Ok(op(
                    "control_repeat_until",
                    vec![
                        ("CONDITION", condition),
                        ("SUBSTACK", Input::Substack(body)),
                    ],
                    vec![],
                ))
            }
            Statement::Forever { body, .. } => {
                let body = self.lower_statements(body, params)?;
                Ok(op(
                    "control_forever",
                    vec![("SUBSTACK", Input::Substack(body))],
                    vec![],
                ))
            }
            Statement::If {
                condition,
                then_body,
                else_body,
                ..
            } => {
                let condition = self.lower_expr(condition, params)?;
                let then_body = self.lower_statements(then_body, params)?;
                if else_body.is_empty() {
                    return Ok(op(
                        "control_if",
                        vec![
                            ("CONDITION", condition),
                            ("SUBSTACK", Input::Substack(then_body)),
                        ],
                        vec![],
                    ));
                }
                let else_body = self.lower_statements(else_body, params)?;
                Ok(op(
                    "control_if_else",
                    vec![
                        ("CONDITION", condition),
                        ("SUBSTACK", Input::Substack(then_body)),
                        ("SUBSTACK2", Input::Substack(else_body)),
                    ],
                    vec![],
                ))
            }
            Statement::StopAll { .. } => Ok(op(
                "control_stop",
                vec![],
                vec![("STOP_OPTION", Field::Text("all".to_string()))],
            )),
            Statement::StopThisScript { .. } => Ok(op(
                "control_stop",
                vec![],
                vec![("STOP_OPTION", Field::Text("this script".to_string()))],
            )),
            Statement::Ask { question, .. } => {
                self.single_input("sensing_askandwait", "QUESTION", question, params)
            }
            Statement::ResetTimer { .. } => Ok(op("sensing_resettimer", vec![], vec![])),
            Statement::AddToList {
                list, item, pos, ..
            } => {
                let target = self.list_target(list, *pos, params)?;
                let item = self.lower_expr(item, params)?;
                Ok(op(
                    "data_addtolist",
                    vec![("ITEM", item)],
                    vec![("LIST", Field::List(target))],
                ))
            }
            Statement::DeleteOfList {
                list, index, pos, ..
            } => {
                let target = self.list_target(list, *pos, params)?;
                let index = self.lower_expr(index, params)?;
                Ok(op(
                    "data_deleteoflist",
                    vec![("INDEX", index)],
                    vec![("LIST", Field::List(target))],
                ))
            }
            Statement::DeleteAllOfList { list, pos, .. } => {
                let target = self.list_target(list, *pos, params)?;
                Ok(op(
                    "data_deletealloflist",
                    vec![],
                    vec![("LIST", Field::List(target))],
                ))
            }
            Statement::InsertAtList {
                list,
                item,
                index,
                pos,
                ..
            } => {
                let target = self.list_target(list, *pos, params)?;
                let item = self.lower_expr(item, params)?;
                let index = self.lower_expr(index, params)?;
                Ok(op(
                    "data_insertatlist",
                    vec![("ITEM", item), ("INDEX", index)],
                    vec![("LIST", Field::List(target))],
                ))
            }
            Statement::ReplaceItemOfList {
                list,
                index,
                item,
                pos,
                ..
            } => {
                let target = self.list_target(list, *pos, params)?;
                let index = self.lower_expr(index, params)?;
                let item = self.lower_expr(item, params)?;
                Ok(op(
                    "data_replaceitemoflist",
                    vec![("INDEX", index), ("ITEM", item)],
                    vec![("LIST", Field::List(target))],
                ))
            }
            Statement::Call {
                name, args, pos, ..
            } => {
                let signature = self.function_signature(name, *pos)?;
                if args.len() != signature.params.len() {
                    return Err(CompileError::ArityMismatch {
                        name: signature.name.clone(),
                        expected: signature.params.len(),
                        given: args.len(),
                        pos: *pos,
                    });
                }
                let function = signature.name.clone();
                let args = args
                    .iter()
                    .map(|arg| self.lower_expr(arg, params))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Block::Call { function, args })
            }
        }
    }

    fn single_input(
        &self,
        opcode: &'static str,
        key: &'static str,
        value: &Expr,
        params: &HashSet<String>,
    ) -> Result<Block, CompileError> {
        let input = self.lower_expr(value, params)?;
        Ok(op(opcode, vec![(key, input)], vec![]))
    }

    fn lower_expr(&self, expr: &Expr, params: &HashSet<String>) -> Result<Input, CompileError> {
        match expr {
            Expr::Number { value, .. } => Ok(Input::Number(*value)),
            Expr::Str { value, .. } => Ok(Input::Text(value.clone())),
            Expr::Ident { name, pos } => {
                if params.contains(&name.to_lowercase()) {
                    return Ok(Input::Reporter(Box::new(op(
                        "argument_reporter_string_number",
                        vec![],
                        vec![("VALUE", Field::Text(name.clone()))],
                    ))));
                }
                match self.resolve(name) {
                    Some(Symbol::Variable { name, .. }) => Ok(Input::Reporter(Box::new(op(
                        "data_variable",
                        vec![],
                        vec![("VARIABLE", Field::Variable(name.clone()))],
                    )))),
                    Some(Symbol::List { name, .. }) => Ok(Input::Reporter(Box::new(op(
                        "data_listcontents",
                        vec![],
                        vec![("LIST", Field::List(name.clone()))],
                    )))),
                    Some(Symbol::Function(_)) => Err(CompileError::NotAVariable {
                        name: name.clone(),
                        pos: *pos,
                    }),
                    None => Err(CompileError::UnresolvedReference {
                        name: name.clone(),
                        pos: *pos,
                    }),
                }
            }
            Expr::PickRandom { low, high, .. } => {
                let low = self.lower_expr(low, params)?;
                let high = self.lower_expr(high, params)?;
                Ok(Input::Reporter(Box::new(op(
                    "operator_random",
                    vec![("FROM", low), ("TO", high)],
                    vec![],
                ))))
            }
            Expr::ItemOfList { list, index, pos } => {
                let target = self.list_target(list, *pos, params)?;
                let index = self.lower_expr(index, params)?;
                Ok(Input::Reporter(Box::new(op(
                    "data_itemoflist",
                    vec![("INDEX", index)],
                    vec![("LIST", Field::List(target))],
                ))))
            }
            Expr::LengthOfList { list, pos } => {
                let target = self.list_target(list, *pos, params)?;
                Ok(Input::Reporter(Box::new(op(
                    "data_lengthoflist",
                    vec![],
                    vec![("LIST", Field::List(target))],
                ))))
            }
            Expr::ListContains { list, item, pos } => {
                let target = self.list_target(list, *pos, params)?;
                let item = self.lower_expr(item, params)?;
                Ok(Input::Reporter(Box::new(op(
                    "data_listcontainsitem",
                    vec![("ITEM", item)],
                    vec![("LIST", Field::List(target))],
                ))))
            }
            Expr::KeyPressed { key, .. } => {
                let key_name = match key.as_ref() {
                    Expr::Str { value, .. } => value.clone(),
                    _ => "space".to_string(),
                };
                Ok(Input::Reporter(Box::new(op(
                    "sensing_keypressed",
                    vec![(
                        "KEY_OPTION",
                        Input::Menu {
                            opcode: "sensing_keyoptions",
                            field: "KEY_OPTION",
                            value: key_name,
                        },
                    )],
                    vec![],
                ))))
            }
            Expr::Reporter { kind, .. } => {
                let opcode = match kind {
                    ReporterKind::Timer => "sensing_timer",
                    ReporterKind::Answer => "sensing_answer",
                    ReporterKind::MouseX => "sensing_mousex",
                    ReporterKind::MouseY => "sensing_mousey",
                    ReporterKind::XPosition => "motion_xposition",
                    ReporterKind::YPosition => "motion_yposition",
                };
                Ok(Input::Reporter(Box::new(op(opcode, vec![], vec![]))))
            }
            Expr::MathFunc { op: math, value, .. } => {
                let value = self.lower_expr(value, params)?;
                let block = match math {
                    MathOp::Round => op("operator_round", vec![("NUM", value)], vec![]),
                    MathOp::Abs => mathop("abs", value),
                    MathOp::Floor => mathop("floor", value),
                    MathOp::Ceiling => mathop("ceiling", value),
                    MathOp::Sqrt => mathop("sqrt", value),
                };
                Ok(Input::Reporter(Box::new(block)))
            }
            Expr::Unary { op: unary, operand, .. } => match unary {
                UnaryOp::Minus => {
                    let operand = self.lower_expr(operand, params)?;
                    Ok(Input::Reporter(Box::new(op(
                        "operator_subtract",
                        vec![("NUM1", Input::Number(0.0)), ("NUM2", operand)],
                        vec![],
                    ))))
                }
                UnaryOp::Not => {
                    let operand = self.lower_expr(operand, params)?;
                    Ok(Input::Reporter(Box::new(op(
                        "operator_not",
                        vec![("OPERAND", operand)],
                        vec![],
                    ))))
                }
            },
            Expr::Binary {
                op: binary,
                left,
                right,
                pos,
            } => self.lower_binary(*binary, left, right, *pos, params),
        }
    }

    fn lower_binary(
        &self,
        binary: BinaryOp,
        left: &Expr,
        right: &Expr,
        pos: Position,
        params: &HashSet<String>,
    ) -> Result<Input, CompileError> {
        // The target has no dedicated !=, <=, >= reporters; rewrite them
        // into the fixed shapes not(=), or(<, =), or(>, =).
        match binary {
            BinaryOp::Ne => {
                let equals = self.lower_binary(BinaryOp::Eq, left, right, pos, params)?;
                return Ok(Input::Reporter(Box::new(op(
                    "operator_not",
                    vec![("OPERAND", equals)],
                    vec![],
                ))));
            }
            BinaryOp::Le | BinaryOp::Ge => {
                let strict = if binary == BinaryOp::Le {
                    BinaryOp::Lt
                } else {
                    BinaryOp::Gt
                };
                let first = self.lower_binary(strict, left, right, pos, params)?;
                let second = self.lower_binary(BinaryOp::Eq, left, right, pos, params)?;
                return Ok(Input::Reporter(Box::new(op(
                    "operator_or",
                    vec![("OPERAND1", first), ("OPERAND2", second)],
                    vec![],
                ))));
            }
            _ => {}
        }
        let (opcode, left_key, right_key) = match binary {
            BinaryOp::Add => ("operator_add", "NUM1", "NUM2"),
            BinaryOp::Sub => ("operator_subtract", "NUM1", "NUM2"),
            BinaryOp::Mul => ("operator_multiply", "NUM1", "NUM2"),
            BinaryOp::Div => ("operator_divide", "NUM1", "NUM2"),
            BinaryOp::Mod => ("operator_mod", "NUM1", "NUM2"),
            BinaryOp::Lt => ("operator_lt", "OPERAND1", "OPERAND2"),
            BinaryOp::Gt => ("operator_gt", "OPERAND1", "OPERAND2"),
            BinaryOp::Eq => ("operator_equals", "OPERAND1", "OPERAND2"),
            BinaryOp::And => ("operator_and", "OPERAND1", "OPERAND2"),
            BinaryOp::Or => ("operator_or", "OPERAND1", "OPERAND2"),
            BinaryOp::Ne | BinaryOp::Le | BinaryOp::Ge => unreachable!(),
        };
        let left = self.lower_expr(left, params)?;
        let right = self.lower_expr(right, params)?;
        Ok(Input::Reporter(Box::new(op(
            opcode,
            vec![(left_key, left), (right_key, right)],
            vec![],
        ))))
    }

    fn resolve(&self, name: &str) -> Option<&Symbol> {
        self.local
            .resolve(name)
            .or_else(|| self.stage.and_then(|table| table.resolve(name)))
    }

    fn variable_target(
        &self,
        name: &str,
        pos: Position,
        params: &HashSet<String>,
    ) -> Result<String, CompileError> {
        if params.contains(&name.to_lowercase()) {
            // Function parameters are read-only argument reporters; they
            // cannot be assignment targets.
            return Err(CompileError::NotAVariable {
                name: name.to_string(),
                pos,
            });
        }
        match self.resolve(name) {
            Some(Symbol::Variable { name, .. }) => Ok(name.clone()),
            Some(_) => Err(CompileError::NotAVariable {
                name: name.to_string(),
                pos,
            }),
            None => Err(CompileError::UnresolvedReference {
                name: name.to_string(),
                pos,
            }),
        }
    }

    fn list_target(
        &self,
        name: &str,
        pos: Position,
        params: &HashSet<String>,
    ) -> Result<String, CompileError> {
        if params.contains(&name.to_lowercase()) {
            return Err(CompileError::NotAList {
                name: name.to_string(),
                pos,
            });
        }
        match self.resolve(name) {
            Some(Symbol::List { name, .. }) => Ok(name.clone()),
            Some(_) => Err(CompileError::NotAList {
                name: name.to_string(),
                pos,
            }),
            None => Err(CompileError::UnresolvedReference {
                name: name.to_string(),
                pos,
            }),
        }
    }

    fn function_signature(
        &self,
        name: &str,
        pos: Position,
    ) -> Result<&FunctionSignature, CompileError> {
        match self.local.resolve(name) {
            Some(Symbol::Function(signature)) => Ok(signature),
            _ => Err(CompileError::UnresolvedReference {
                name: name.to_string(),
                pos,
            }),
        }
    }
}

fn op(
    opcode: &'static str,
    inputs: Vec<(&'static str, Input)>,
    fields: Vec<(&'static str, Field)>,
) -> Block {
    Block::Op {
        opcode,
        inputs,
        fields,
    }
}

fn mathop(operator: &str, value: Input) -> Block {
    op(
        "operator_mathop",
        vec![("NUM", value)],
        vec![("OPERATOR", Field::Text(operator.to_string()))],
    )
}

fn format_costume_number(value: f64) -> String {
    if (value - value.round()).abs() < 1e-9 {
        format!("{}", value.round() as i64)
    } else {
        format!("{}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;
    use crate::symbols;

    fn lower_unit(source: &str, stage: Option<&SymbolTable>) -> Result<Vec<Script>, CompileError> {
        let ast = parser::parse(source).unwrap();
        let table = symbols::collect(&ast).unwrap();
        lower(&ast, &table, stage)
    }

    fn stage_table(source: &str) -> SymbolTable {
        symbols::collect(&parser::parse(source).unwrap()).unwrap()
    }

    #[test]
    fn forward_references_resolve() {
        let scripts = lower_unit(
            "when flag clicked\n  tick\n  set speed to (5)\nend\ndefine tick\n  move (speed)\nend\nvar speed\n",
            None,
        )
        .unwrap();
        assert_eq!(scripts.len(), 2);
    }

    #[test]
    fn stage_declarations_are_visible_to_sprites() {
        let stage = stage_table("list score\n");
        let scripts = lower_unit(
            "when flag clicked\n  add (1) to score\nend\n",
            Some(&stage),
        )
        .unwrap();
        let Block::Op { opcode, fields, .. } = &scripts[0].body[0] else {
            panic!("expected op block");
        };
        assert_eq!(*opcode, "data_addtolist");
        assert_eq!(fields[0].1, Field::List("score".to_string()));
    }

    #[test]
    fn local_declarations_shadow_the_stage() {
        let stage = stage_table("var speed\n");
        let scripts = lower_unit(
            "var speed\nwhen flag clicked\n  set speed to (1)\nend\n",
            Some(&stage),
        )
        .unwrap();
        assert_eq!(scripts.len(), 1);
    }

    #[test]
    fn unresolved_reference_names_the_identifier() {
        let err = lower_unit("when flag clicked\n  set speed to (1)\nend\n", None).unwrap_err();
        let CompileError::UnresolvedReference { name, pos } = err else {
            panic!("expected unresolved reference");
        };
        assert_eq!(name, "speed");
        assert_eq!(pos.line, 2);
    }

    #[test]
    fn arity_mismatch_is_reported() {
        let err = lower_unit(
            "define greet(name)\n  say (name)\nend\nwhen flag clicked\n  greet(\"hi\", 3)\nend\n",
            None,
        )
        .unwrap_err();
        let CompileError::ArityMismatch {
            name,
            expected,
            given,
            ..
        } = err
        else {
            panic!("expected arity mismatch");
        };
        assert_eq!(name, "greet");
        assert_eq!(expected, 1);
        assert_eq!(given, 2);
    }

    #[test]
    fn list_operation_on_a_variable_is_rejected() {
        let err = lower_unit("var score\nwhen flag clicked\n  add (1) to score\nend\n", None)
            .unwrap_err();
        assert!(matches!(err, CompileError::NotAList { name, .. } if name == "score"));
    }

    #[test]
    fn assignment_to_a_list_is_rejected() {
        let err = lower_unit(
            "list inventory\nwhen flag clicked\n  set inventory to (1)\nend\n",
            None,
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::NotAVariable { name, .. } if name == "inventory"));
    }

    #[test]
    fn stage_functions_are_not_callable_from_sprites() {
        let stage = stage_table("define reset_all\nend\n");
        let err = lower_unit("when flag clicked\n  reset_all\nend\n", Some(&stage)).unwrap_err();
        assert!(matches!(err, CompileError::UnresolvedReference { name, .. } if name == "reset_all"));
    }

    #[test]
    fn parameters_lower_to_argument_reporters() {
        let scripts = lower_unit("define greet(name)\n  say (name)\nend\n", None).unwrap();
        let Block::Op { inputs, .. } = &scripts[0].body[0] else {
            panic!("expected op block");
        };
        let Input::Reporter(reporter) = &inputs[0].1 else {
            panic!("expected reporter input");
        };
        assert!(
            matches!(&**reporter, Block::Op { opcode, .. } if *opcode == "argument_reporter_string_number")
        );
    }

    #[test]
    fn parameters_cannot_be_assigned() {
        let err = lower_unit("define f(a)\n  set a to (1)\nend\n", None).unwrap_err();
        assert!(matches!(err, CompileError::NotAVariable { name, .. } if name == "a"));
    }

    #[test]
    fn inequality_lowers_to_not_equals() {
        let scripts = lower_unit(
            "var score\nwhen flag clicked\n  wait until (score != 3)\nend\n",
            None,
        )
        .unwrap();
        let Block::Op { inputs, .. } = &scripts[0].body[0] else {
            panic!("expected op block");
        };
        let Input::Reporter(not_block) = &inputs[0].1 else {
            panic!("expected reporter input");
        };
        let Block::Op { opcode, inputs, .. } = &**not_block else {
            panic!("expected op block");
        };
        assert_eq!(*opcode, "operator_not");
        let Input::Reporter(equals) = &inputs[0].1 else {
            panic!("expected nested reporter");
        };
        assert!(matches!(&**equals, Block::Op { opcode, .. } if *opcode == "operator_equals"));
    }

    #[test]
    fn lowering_is_deterministic() {
        let source = "var score\nwhen flag clicked\n  repeat (10)\n    change score by (1)\n  end\nend\n";
        let first = lower_unit(source, None).unwrap();
        let second = lower_unit(source, None).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn source_order_of_scripts_is_preserved() {
        let scripts = lower_unit(
            "when flag clicked\nend\ndefine helper\nend\nwhen this sprite clicked\nend\n",
            None,
        )
        .unwrap();
        assert!(matches!(scripts[0].hat, Hat::FlagClicked));
        assert!(matches!(scripts[1].hat, Hat::FunctionDefinition { .. }));
        assert!(matches!(scripts[2].hat, Hat::SpriteClicked));
    }
}
