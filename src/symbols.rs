use crate::ast::{Ast, Item, Position};
use crate::error::CompileError;
use std::collections::{HashMap, HashSet};

/// A costume registered during declaration collection. The display name is
/// the file stem of the declared path.
#[derive(Debug, Clone)]
pub struct Costume {
    pub name: String,
    pub path: String,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct FunctionSignature {
    pub name: String,
    pub params: Vec<String>,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub enum Symbol {
    Variable { name: String, pos: Position },
    List { name: String, pos: Position },
    Function(FunctionSignature),
}

impl Symbol {
    pub fn name(&self) -> &str {
        match self {
            Symbol::Variable { name, .. } | Symbol::List { name, .. } => name,
            Symbol::Function(signature) => &signature.name,
        }
    }

    pub fn pos(&self) -> Position {
        match self {
            Symbol::Variable { pos, .. } | Symbol::List { pos, .. } => *pos,
            Symbol::Function(signature) => signature.pos,
        }
    }
}

/// The per-unit symbol table produced by the declaration pass. Variables,
/// lists, and functions share one namespace keyed case-insensitively;
/// costumes keep their own ordered sequence. The table has no mutation API
/// once built.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    by_name: HashMap<String, Symbol>,
    variables: Vec<String>,
    lists: Vec<String>,
    costumes: Vec<Costume>,
}

impl SymbolTable {
    /// Looks a declared name up, case-insensitively.
    pub fn resolve(&self, name: &str) -> Option<&Symbol> {
        self.by_name.get(&name.to_lowercase())
    }

    /// Declared variable names, in declaration order.
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Declared list names, in declaration order.
    pub fn lists(&self) -> &[String] {
        &self.lists
    }

    /// Declared costumes, in declaration order.
    pub fn costumes(&self) -> &[Costume] {
        &self.costumes
    }
}

/// Pass 1: walks the unit's items in document order and records every
/// declaration, so later references resolve no matter where the declaration
/// sits in the source. Event bodies carry no declarations in this grammar,
/// so a single scan over the top-level items covers the whole unit.
pub fn collect(ast: &Ast) -> Result<SymbolTable, CompileError> {
    let mut table = SymbolTable::default();
    let mut costume_names: HashMap<String, Position> = HashMap::new();
    for item in &ast.items {
        match item {
            Item::Costume(decl) => {
                let name = costume_display_name(&decl.path);
                if let Some(first) = costume_names.get(&name.to_lowercase()) {
                    return Err(CompileError::DuplicateDeclaration {
                        name,
                        first: *first,
                        second: decl.pos,
                    });
                }
                costume_names.insert(name.to_lowercase(), decl.pos);
                table.costumes.push(Costume {
                    name,
                    path: decl.path.clone(),
                    pos: decl.pos,
                });
            }
            Item::Variable(decl) => {
                register(
                    &mut table,
                    Symbol::Variable {
                        name: decl.name.clone(),
                        pos: decl.pos,
                    },
                )?;
                table.variables.push(decl.name.clone());
            }
            Item::List(decl) => {
                register(
                    &mut table,
                    Symbol::List {
                        name: decl.name.clone(),
                        pos: decl.pos,
                    },
                )?;
                table.lists.push(decl.name.clone());
            }
            Item::Procedure(procedure) => {
                let mut seen_params: HashSet<String> = HashSet::new();
                for param in &procedure.params {
                    if !seen_params.insert(param.to_lowercase()) {
                        return Err(CompileError::DuplicateDeclaration {
                            name: param.clone(),
                            first: procedure.pos,
                            second: procedure.pos,
                        });
                    }
                }
                register(
                    &mut table,
                    Symbol::Function(FunctionSignature {
                        name: procedure.name.clone(),
                        params: procedure.params.clone(),
                        pos: procedure.pos,
                    }),
                )?;
            }
            Item::Event(_) => {}
        }
    }
    Ok(table)
}

fn register(table: &mut SymbolTable, symbol: Symbol) -> Result<(), CompileError> {
    let key = symbol.name().to_lowercase();
    if let Some(existing) = table.by_name.get(&key) {
        return Err(CompileError::DuplicateDeclaration {
            name: symbol.name().to_string(),
            first: existing.pos(),
            second: symbol.pos(),
        });
    }
    table.by_name.insert(key, symbol);
    Ok(())
}

fn costume_display_name(path: &str) -> String {
    let stem = std::path::Path::new(path)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("");
    if stem.is_empty() {
        path.to_string()
    } else {
        stem.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;

    fn collect_ok(source: &str) -> SymbolTable {
        collect(&parser::parse(source).unwrap()).unwrap()
    }

    #[test]
    fn collects_every_declaration_kind() {
        let table = collect_ok(
            "costume \"cat.svg\"\nvar score\nlist inventory\ndefine greet(name)\n  say (name)\nend\n",
        );
        assert_eq!(table.variables(), ["score"]);
        assert_eq!(table.lists(), ["inventory"]);
        assert_eq!(table.costumes().len(), 1);
        assert_eq!(table.costumes()[0].name, "cat");
        assert!(matches!(
            table.resolve("greet"),
            Some(Symbol::Function(sig)) if sig.params == ["name"]
        ));
    }

    #[test]
    fn declarations_after_scripts_are_still_collected() {
        let table = collect_ok("when flag clicked\n  set score to (1)\nend\nvar score\n");
        assert_eq!(table.variables(), ["score"]);
    }

    #[test]
    fn resolution_is_case_insensitive() {
        let table = collect_ok("var Score\n");
        assert!(matches!(
            table.resolve("score"),
            Some(Symbol::Variable { name, .. }) if name == "Score"
        ));
    }

    #[test]
    fn duplicate_names_cite_both_sites() {
        let err = collect(&parser::parse("var score\nlist score\n").unwrap()).unwrap_err();
        let CompileError::DuplicateDeclaration {
            name,
            first,
            second,
        } = err
        else {
            panic!("expected duplicate declaration error");
        };
        assert_eq!(name, "score");
        assert_eq!(first.line, 1);
        assert_eq!(second.line, 2);
    }

    #[test]
    fn duplicate_costume_names_are_rejected() {
        let err =
            collect(&parser::parse("costume \"cat.svg\"\ncostume \"art/cat.png\"\n").unwrap())
                .unwrap_err();
        assert!(matches!(err, CompileError::DuplicateDeclaration { name, .. } if name == "cat"));
    }

    #[test]
    fn duplicate_parameter_names_are_rejected() {
        let err = collect(&parser::parse("define f(a, a)\nend\n").unwrap()).unwrap_err();
        assert!(matches!(err, CompileError::DuplicateDeclaration { name, .. } if name == "a"));
    }

    #[test]
    fn variables_keep_declaration_order() {
        let table = collect_ok("var zebra\nvar apple\nvar mango\n");
        assert_eq!(table.variables(), ["zebra", "apple", "mango"]);
    }
}
