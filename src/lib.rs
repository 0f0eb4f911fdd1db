pub mod ast;
pub mod cli;
pub mod codegen;
pub mod error;
pub mod ir;
pub mod lexer;
pub mod loader;
pub mod parser;
pub mod sb3;
pub mod symbols;

use anyhow::Result;
use error::{CompileError, Diagnostic};
use ir::{Project, Unit};
use loader::SourceFile;
use std::path::{Path, PathBuf};
use symbols::SymbolTable;

/// Compiles one unit from source text: parse, declaration pass, block
/// generation, assembly. `stage_table` is the Stage's frozen symbol table,
/// absent when compiling the Stage itself. The returned table lets the
/// caller thread the Stage's declarations into later units.
pub fn compile_unit(
    name: &str,
    source: &str,
    stage_table: Option<&SymbolTable>,
) -> Result<(Unit, SymbolTable), CompileError> {
    let ast = parser::parse(source)?;
    let table = symbols::collect(&ast)?;
    let scripts = codegen::lower(&ast, &table, stage_table)?;
    let unit = Unit::assemble(name, &table, scripts);
    Ok((unit, table))
}

/// Compiles every unit in `folder` into a project. The Stage completes both
/// passes before any ordinary unit starts, because ordinary units resolve
/// identifiers against the Stage's table. A failing unit is recorded and
/// skipped; its siblings still compile. Any diagnostic fails the whole
/// build, and nothing is exported.
pub fn compile_folder(folder: &Path) -> Result<Project, Vec<Diagnostic>> {
    let sources = match loader::discover(folder) {
        Ok(sources) => sources,
        Err(error) => {
            let unit = match &error {
                CompileError::DuplicateStage { .. } => loader::STAGE_NAME,
                _ => "project",
            };
            return Err(vec![Diagnostic::new(unit, error)]);
        }
    };

    let mut diagnostics = Vec::new();
    let mut stage_unit = None;
    let mut stage_table = None;
    if let Some(stage_source) = sources.iter().find(|source| source.is_stage) {
        match compile_source_file(stage_source, None) {
            Ok((unit, table)) => {
                stage_unit = Some(unit);
                stage_table = Some(table);
            }
            Err(error) => diagnostics.push(Diagnostic::new(&stage_source.unit_name, error)),
        }
    }

    let mut sprites = Vec::new();
    for source in sources.iter().filter(|source| !source.is_stage) {
        match compile_source_file(source, stage_table.as_ref()) {
            Ok((unit, _)) => sprites.push(unit),
            Err(error) => diagnostics.push(Diagnostic::new(&source.unit_name, error)),
        }
    }

    if !diagnostics.is_empty() {
        return Err(diagnostics);
    }
    let stage = stage_unit.unwrap_or_else(Unit::empty_stage);
    Project::assemble(stage, sprites).map_err(|error| vec![Diagnostic::new("project", error)])
}

fn compile_source_file(
    source: &SourceFile,
    stage_table: Option<&SymbolTable>,
) -> Result<(Unit, SymbolTable), CompileError> {
    let text = loader::read_source(source)?;
    compile_unit(&source.unit_name, &text, stage_table)
}

/// The one build command: compile the folder and export the archive. Exit
/// is non-zero when any unit failed, with one diagnostic line per failing
/// unit on stderr.
pub fn run_cli(args: &cli::Args) -> Result<()> {
    let folder = canonicalize_folder(&args.folder)?;
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&folder));
    let project = match compile_folder(&folder) {
        Ok(project) => project,
        Err(diagnostics) => {
            for diagnostic in &diagnostics {
                eprintln!("{}", diagnostic);
            }
            anyhow::bail!(
                "Build failed with {} error(s); nothing was exported.",
                diagnostics.len()
            );
        }
    };
    sb3::write_sb3(&project, &folder, &output)?;
    Ok(())
}

pub fn canonicalize_folder(path: &Path) -> Result<PathBuf> {
    if !path.is_dir() {
        return Err(anyhow::anyhow!(
            "Source folder not found: '{}'.",
            path.display()
        ));
    }
    Ok(path.canonicalize()?)
}

fn default_output_path(folder: &Path) -> PathBuf {
    let name = folder
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("project");
    folder.join(name).with_extension("sb3")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, name: &str, contents: &str) {
        fs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn stage_globals_resolve_in_sprites() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "stage.sbs", "list score\n");
        write(
            dir.path(),
            "player.sbs",
            "when flag clicked\n  add (1) to score\nend\n",
        );
        let project = compile_folder(dir.path()).unwrap();
        assert_eq!(project.stage().lists(), ["score"]);
        assert_eq!(project.sprites()[0].name(), "player");
    }

    #[test]
    fn undeclared_reference_fails_only_its_unit() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "bad.sbs",
            "when flag clicked\n  move (speed)\nend\n",
        );
        write(dir.path(), "good.sbs", "var x_speed\n");
        write(dir.path(), "stage.sbs", "");
        let diagnostics = compile_folder(dir.path()).unwrap_err();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].unit, "bad");
        let CompileError::UnresolvedReference { name, pos } = &diagnostics[0].error else {
            panic!("expected unresolved reference");
        };
        assert_eq!(name, "speed");
        assert_eq!(pos.line, 2);
    }

    #[test]
    fn every_failing_unit_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.sbs", "when flag clicked\n  move (v1)\nend\n");
        write(dir.path(), "b.sbs", "when flag clicked\n  move (v2)\nend\n");
        let diagnostics = compile_folder(dir.path()).unwrap_err();
        let units: Vec<_> = diagnostics.iter().map(|d| d.unit.as_str()).collect();
        assert_eq!(units, vec!["a", "b"]);
    }

    #[test]
    fn stage_failure_does_not_abort_sprites() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "stage.sbs",
            "when flag clicked\n  move (missing)\nend\n",
        );
        write(dir.path(), "cat.sbs", "var speed\n");
        let diagnostics = compile_folder(dir.path()).unwrap_err();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].unit, "Stage");
    }

    #[test]
    fn stage_is_first_regardless_of_file_order() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "apple.sbs", "");
        write(dir.path(), "stage.sbs", "var tempo\n");
        write(dir.path(), "zebra.sbs", "");
        let project = compile_folder(dir.path()).unwrap();
        assert_eq!(project.units()[0].name(), "Stage");
        let sprite_names: Vec<_> = project.sprites().iter().map(|u| u.name()).collect();
        assert_eq!(sprite_names, vec!["apple", "zebra"]);
    }

    #[test]
    fn missing_stage_file_synthesizes_an_empty_stage() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "cat.sbs", "var speed\n");
        let project = compile_folder(dir.path()).unwrap();
        assert_eq!(project.stage().name(), "Stage");
        assert!(project.stage().variables().is_empty());
        assert_eq!(project.sprites()[0].name(), "cat");
    }

    #[test]
    fn duplicate_stage_files_fail_the_build() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "stage.sbs", "");
        write(dir.path(), "STAGE.sbs", "");
        let diagnostics = compile_folder(dir.path()).unwrap_err();
        assert_eq!(diagnostics[0].unit, "Stage");
        assert!(matches!(
            diagnostics[0].error,
            CompileError::DuplicateStage { .. }
        ));
    }

    #[test]
    fn syntax_errors_are_attributed_to_their_unit() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "broken.sbs", "when flag clicked\n  say hello\nend\n");
        let diagnostics = compile_folder(dir.path()).unwrap_err();
        assert_eq!(diagnostics[0].unit, "broken");
        assert!(matches!(
            diagnostics[0].error,
            CompileError::Syntax { .. }
        ));
    }

    #[test]
    fn compiling_twice_yields_identical_archives() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "stage.sbs", "list score\n");
        write(
            dir.path(),
            "cat.sbs",
            "var speed\nwhen flag clicked\n  set speed to (pick random (1) to (10))\n  broadcast [go]\nend\nwhen i receive [go]\n  add (speed) to score\nend\n",
        );
        let first_project = compile_folder(dir.path()).unwrap();
        let second_project = compile_folder(dir.path()).unwrap();
        let first = sb3::build_sb3_bytes(&first_project, dir.path()).unwrap();
        let second = sb3::build_sb3_bytes(&second_project, dir.path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn materialized_names_match_the_declaration_pass() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "cat.sbs",
            "var a\nlist b\nvar c\ndefine f\nend\n",
        );
        let project = compile_folder(dir.path()).unwrap();
        let unit = &project.sprites()[0];
        assert_eq!(unit.variables(), ["a", "c"]);
        assert_eq!(unit.lists(), ["b"]);
    }

    #[test]
    fn forward_references_compile_across_the_whole_unit() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "cat.sbs",
            "when flag clicked\n  greet(\"hi\")\n  add (1) to later_list\nend\ndefine greet(who)\n  say (who)\nend\nlist later_list\n",
        );
        assert!(compile_folder(dir.path()).is_ok());
    }

    #[test]
    fn default_output_lands_inside_the_folder() {
        let path = default_output_path(Path::new("/tmp/my_game"));
        assert_eq!(path, Path::new("/tmp/my_game/my_game.sb3"));
    }
}
