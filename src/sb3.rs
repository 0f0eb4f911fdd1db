use crate::ir::{Block, Field, Hat, Input, Project, Script, Unit};
use anyhow::{anyhow, bail, Result};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Cursor;
use std::io::Write;
use std::path::Path;
use zip::write::SimpleFileOptions;

const DEFAULT_STAGE_SVG: &str =
    r##"<svg xmlns="http://www.w3.org/2000/svg" width="1" height="1" viewBox="0 0 1 1"></svg>"##;
const DEFAULT_SPRITE_SVG: &str =
    r##"<svg xmlns="http://www.w3.org/2000/svg" width="1" height="1" viewBox="0 0 1 1"></svg>"##;

/// Serializes the project into an `.sb3` archive at `output_path`. Costume
/// files are resolved relative to `assets_dir`.
pub fn write_sb3(project: &Project, assets_dir: &Path, output_path: &Path) -> Result<()> {
    let bytes = build_sb3_bytes(project, assets_dir)?;
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(output_path, bytes)?;
    Ok(())
}

pub fn build_sb3_bytes(project: &Project, assets_dir: &Path) -> Result<Vec<u8>> {
    let mut writer = Sb3Writer::new(project, assets_dir);
    let (project_json, assets) = writer.build()?;
    let mut buffer = Cursor::new(Vec::<u8>::new());
    let mut zip = zip::ZipWriter::new(&mut buffer);
    let opts = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    zip.start_file("project.json", opts)?;
    let project_bytes = serde_json::to_vec_pretty(&project_json)?;
    zip.write_all(&project_bytes)?;

    let mut assets = assets.into_iter().collect::<Vec<_>>();
    assets.sort_by(|(left_name, _), (right_name, _)| left_name.cmp(right_name));
    for (name, bytes) in assets {
        zip.start_file(name, opts)?;
        zip.write_all(&bytes)?;
    }
    zip.finish()?;
    Ok(buffer.into_inner())
}

#[derive(Debug, Clone)]
struct FunctionShape {
    params: Vec<String>,
    arg_ids: Vec<String>,
    proccode: String,
}

struct Sb3Writer<'a> {
    project: &'a Project,
    assets_dir: &'a Path,
    id_counter: usize,
    assets: HashMap<String, Vec<u8>>,
    broadcast_ids: HashMap<String, String>,
    global_var_ids: HashMap<String, String>,
    global_list_ids: HashMap<String, String>,
}

impl<'a> Sb3Writer<'a> {
    fn new(project: &'a Project, assets_dir: &'a Path) -> Self {
        Self {
            project,
            assets_dir,
            id_counter: 0,
            assets: HashMap::new(),
            broadcast_ids: HashMap::new(),
            global_var_ids: HashMap::new(),
            global_list_ids: HashMap::new(),
        }
    }

    fn build(&mut self) -> Result<(Value, HashMap<String, Vec<u8>>)> {
        self.collect_broadcast_ids();
        self.register_stage_globals();

        let mut targets_json = Vec::new();
        for (index, unit) in self.project.units().iter().enumerate() {
            let is_stage = index == 0;
            targets_json.push(self.build_target_json(unit, is_stage, index as i32)?);
        }

        let project_json = json!({
            "targets": targets_json,
            "monitors": [],
            "extensions": [],
            "meta": {
                "semver": "3.0.0",
                "vm": "0.2.0",
                "agent": "sbscript compiler"
            }
        });
        Ok((project_json, std::mem::take(&mut self.assets)))
    }

    /// Broadcast ids are assigned project-wide in sorted-message order, so
    /// the same sources always produce the same archive.
    fn collect_broadcast_ids(&mut self) {
        let mut messages = HashSet::new();
        for unit in self.project.units() {
            for script in unit.scripts() {
                if let Hat::BroadcastReceived(message) = &script.hat {
                    messages.insert(message.clone());
                }
                for block in &script.body {
                    collect_messages_from_block(block, &mut messages);
                }
            }
        }
        let mut sorted = messages.into_iter().collect::<Vec<_>>();
        sorted.sort();
        for message in sorted {
            let id = self.new_id("broadcast");
            self.broadcast_ids.insert(message, id);
        }
    }

    /// The stage's variables and lists form the project-global pool; their
    /// ids are fixed up front so sprite targets can reference them.
    fn register_stage_globals(&mut self) {
        let stage = self.project.stage();
        for name in stage.variables() {
            let id = self.new_id("var");
            self.global_var_ids.insert(name.to_lowercase(), id);
        }
        for name in stage.lists() {
            let id = self.new_id("list");
            self.global_list_ids.insert(name.to_lowercase(), id);
        }
    }

    fn build_target_json(&mut self, unit: &Unit, is_stage: bool, layer_order: i32) -> Result<Value> {
        let mut var_ids: HashMap<String, String> = HashMap::new();
        let mut variables_json: Map<String, Value> = Map::new();
        for name in unit.variables() {
            let key = name.to_lowercase();
            let id = if is_stage {
                self.global_var_ids
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| anyhow!("Missing global id for stage variable '{}'.", name))?
            } else {
                self.new_id("var")
            };
            var_ids.insert(key, id.clone());
            variables_json.insert(id, json!([name, 0]));
        }
        let mut list_ids: HashMap<String, String> = HashMap::new();
        let mut lists_json: Map<String, Value> = Map::new();
        for name in unit.lists() {
            let key = name.to_lowercase();
            let id = if is_stage {
                self.global_list_ids
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| anyhow!("Missing global id for stage list '{}'.", name))?
            } else {
                self.new_id("list")
            };
            list_ids.insert(key, id.clone());
            lists_json.insert(id, json!([name, []]));
        }
        // Local ids win over the global pool, mirroring how identifiers
        // were resolved during block generation.
        if !is_stage {
            for (key, id) in &self.global_var_ids {
                var_ids.entry(key.clone()).or_insert_with(|| id.clone());
            }
            for (key, id) in &self.global_list_ids {
                list_ids.entry(key.clone()).or_insert_with(|| id.clone());
            }
        }

        let shapes = self.build_function_shapes(unit);
        let mut blocks: Map<String, Value> = Map::new();
        let mut y_cursor: i32 = 30;
        for script in unit.scripts() {
            y_cursor = self.emit_script(&mut blocks, script, &var_ids, &list_ids, &shapes, y_cursor)?;
            y_cursor += 40;
        }

        let costumes = self.build_costumes(unit, is_stage)?;
        let broadcasts = if is_stage {
            let mut map = Map::new();
            for (message, id) in &self.broadcast_ids {
                map.insert(id.clone(), Value::String(message.clone()));
            }
            Value::Object(map)
        } else {
            Value::Object(Map::new())
        };

        let mut target_json = json!({
            "isStage": is_stage,
            "name": unit.name(),
            "variables": variables_json,
            "lists": lists_json,
            "broadcasts": broadcasts,
            "blocks": blocks,
            "comments": {},
            "currentCostume": 0,
            "costumes": costumes,
            "sounds": [],
            "volume": 100,
            "layerOrder": layer_order
        });
        if is_stage {
            merge_object(
                &mut target_json,
                json!({
                    "tempo": 60,
                    "videoTransparency": 50,
                    "videoState": "on",
                    "textToSpeechLanguage": Value::Null
                }),
            )?;
        } else {
            merge_object(
                &mut target_json,
                json!({
                    "visible": true,
                    "x": 0,
                    "y": 0,
                    "size": 100,
                    "direction": 90,
                    "draggable": false,
                    "rotationStyle": "all around"
                }),
            )?;
        }
        Ok(target_json)
    }

    fn build_function_shapes(&mut self, unit: &Unit) -> HashMap<String, FunctionShape> {
        let mut shapes = HashMap::new();
        for script in unit.scripts() {
            let Hat::FunctionDefinition { name, params } = &script.hat else {
                continue;
            };
            let arg_ids = params
                .iter()
                .map(|_| self.new_id("arg"))
                .collect::<Vec<_>>();
            let placeholders = params.iter().map(|_| "%s").collect::<Vec<_>>().join(" ");
            let proccode = if placeholders.is_empty() {
                name.clone()
            } else {
                format!("{} {}", name, placeholders)
            };
            shapes.insert(
                name.to_lowercase(),
                FunctionShape {
                    params: params.clone(),
                    arg_ids,
                    proccode,
                },
            );
        }
        shapes
    }

    fn emit_script(
        &mut self,
        blocks: &mut Map<String, Value>,
        script: &Script,
        var_ids: &HashMap<String, String>,
        list_ids: &HashMap<String, String>,
        shapes: &HashMap<String, FunctionShape>,
        start_y: i32,
    ) -> Result<i32> {
        let hat_id = match &script.hat {
            Hat::FunctionDefinition { name, .. } => {
                self.emit_function_definition(blocks, name, shapes, start_y)?
            }
            Hat::FlagClicked => self.emit_event_hat(blocks, "event_whenflagclicked", json!({}), start_y)?,
            Hat::SpriteClicked => {
                self.emit_event_hat(blocks, "event_whenthisspriteclicked", json!({}), start_y)?
            }
            Hat::BroadcastReceived(message) => {
                let id = self.broadcast_id(message);
                self.emit_event_hat(
                    blocks,
                    "event_whenbroadcastreceived",
                    json!({"BROADCAST_OPTION": [message, id]}),
                    start_y,
                )?
            }
        };
        let (first, last) =
            self.emit_block_chain(blocks, &script.body, &hat_id, var_ids, list_ids, shapes)?;
        if let Some(first_id) = first {
            set_block_next(blocks, &hat_id, Value::String(first_id))?;
            return Ok(start_y + 120 + if last.is_some() { 20 } else { 0 });
        }
        Ok(start_y + 80)
    }

    fn emit_event_hat(
        &mut self,
        blocks: &mut Map<String, Value>,
        opcode: &str,
        fields: Value,
        start_y: i32,
    ) -> Result<String> {
        let hat_id = self.new_block_id();
        blocks.insert(
            hat_id.clone(),
            json!({
                "opcode": opcode,
                "next": Value::Null,
                "parent": Value::Null,
                "inputs": {},
                "fields": fields,
                "shadow": false,
                "topLevel": true,
                "x": 320,
                "y": start_y
            }),
        );
        Ok(hat_id)
    }

    fn emit_function_definition(
        &mut self,
        blocks: &mut Map<String, Value>,
        name: &str,
        shapes: &HashMap<String, FunctionShape>,
        start_y: i32,
    ) -> Result<String> {
        let shape = shapes
            .get(&name.to_lowercase())
            .ok_or_else(|| anyhow!("Missing function shape for '{}'.", name))?;
        let definition_id = self.new_block_id();
        let prototype_id = self.new_block_id();
        blocks.insert(
            definition_id.clone(),
            json!({
                "opcode": "procedures_definition",
                "next": Value::Null,
                "parent": Value::Null,
                "inputs": { "custom_block": [1, prototype_id.clone()]},
                "fields": {},
                "shadow": false,
                "topLevel": true,
                "x": 30,
                "y": start_y
            }),
        );
        let mut prototype_inputs = Map::new();
        for (param, arg_id) in shape.params.iter().zip(shape.arg_ids.iter()) {
            let reporter_id = self.new_block_id();
            blocks.insert(
                reporter_id.clone(),
                json!({
                    "opcode": "argument_reporter_string_number",
                    "next": Value::Null,
                    "parent": prototype_id.clone(),
                    "inputs": {},
                    "fields": { "VALUE": [param, Value::Null]},
                    "shadow": true,
                    "topLevel": false
                }),
            );
            prototype_inputs.insert(arg_id.clone(), json!([1, reporter_id]));
        }
        blocks.insert(
            prototype_id.clone(),
            json!({
                "opcode": "procedures_prototype",
                "next": Value::Null,
                "parent": definition_id.clone(),
                "inputs": prototype_inputs,
                "fields": {},
                "shadow": true,
                "topLevel": false,
                "mutation": {
                    "tagName": "mutation",
                    "children": [],
                    "proccode": shape.proccode,
                    "argumentids": serde_json::to_string(&shape.arg_ids)?,
                    "argumentnames": serde_json::to_string(&shape.params)?,
                    "argumentdefaults": serde_json::to_string(&vec![""; shape.params.len()])?,
                    "warp": "false"
                }
            }),
        );
        Ok(definition_id)
    }

    fn emit_block_chain(
        &mut self,
        blocks: &mut Map<String, Value>,
        body: &[Block],
        parent_id: &str,
        var_ids: &HashMap<String, String>,
        list_ids: &HashMap<String, String>,
        shapes: &HashMap<String, FunctionShape>,
    ) -> Result<(Option<String>, Option<String>)> {
        let mut first: Option<String> = None;
        let mut prev: Option<String> = None;
        for block in body {
            let parent = prev.clone().unwrap_or_else(|| parent_id.to_string());
            let block_id = self.emit_block(blocks, block, &parent, var_ids, list_ids, shapes)?;
            if let Some(prev_id) = &prev {
                set_block_next(blocks, prev_id, Value::String(block_id.clone()))?;
            }
            if first.is_none() {
                first = Some(block_id.clone());
            }
            prev = Some(block_id);
        }
        Ok((first, prev))
    }

    fn emit_block(
        &mut self,
        blocks: &mut Map<String, Value>,
        block: &Block,
        parent_id: &str,
        var_ids: &HashMap<String, String>,
        list_ids: &HashMap<String, String>,
        shapes: &HashMap<String, FunctionShape>,
    ) -> Result<String> {
        match block {
            Block::Op {
                opcode,
                inputs,
                fields,
            } => {
                let block_id = self.new_block_id();
                let mut fields_json = Map::new();
                for (key, field) in fields {
                    let entry = match field {
                        Field::Variable(name) => {
                            let id = var_ids.get(&name.to_lowercase()).ok_or_else(|| {
                                anyhow!("Variable '{}' has no id in this target.", name)
                            })?;
                            json!([name, id])
                        }
                        Field::List(name) => {
                            let id = list_ids.get(&name.to_lowercase()).ok_or_else(|| {
                                anyhow!("List '{}' has no id in this target.", name)
                            })?;
                            json!([name, id])
                        }
                        Field::Text(text) => json!([text, Value::Null]),
                    };
                    fields_json.insert(key.to_string(), entry);
                }
                let mut block_json = json!({
                    "opcode": opcode,
                    "next": Value::Null,
                    "parent": parent_id,
                    "inputs": {},
                    "fields": fields_json,
                    "shadow": false,
                    "topLevel": false
                });
                if *opcode == "control_stop" {
                    merge_object(
                        &mut block_json,
                        json!({"mutation": {"tagName": "mutation", "children": [], "hasnext": "false"}}),
                    )?;
                }
                blocks.insert(block_id.clone(), block_json);
                for (key, input) in inputs {
                    if let Some(value) =
                        self.emit_input(blocks, input, &block_id, var_ids, list_ids, shapes)?
                    {
                        set_block_input(blocks, &block_id, key, value)?;
                    }
                }
                Ok(block_id)
            }
            Block::Call { function, args } => {
                let shape = shapes
                    .get(&function.to_lowercase())
                    .ok_or_else(|| anyhow!("Unknown function '{}' during export.", function))?
                    .clone();
                let block_id = self.new_block_id();
                blocks.insert(
                    block_id.clone(),
                    json!({
                        "opcode": "procedures_call",
                        "next": Value::Null,
                        "parent": parent_id,
                        "inputs": {},
                        "fields": {},
                        "shadow": false,
                        "topLevel": false,
                        "mutation": {
                            "tagName": "mutation",
                            "children": [],
                            "proccode": shape.proccode,
                            "argumentids": serde_json::to_string(&shape.arg_ids)?,
                            "warp": "false"
                        }
                    }),
                );
                for (arg_id, arg) in shape.arg_ids.iter().zip(args.iter()) {
                    if let Some(value) =
                        self.emit_input(blocks, arg, &block_id, var_ids, list_ids, shapes)?
                    {
                        set_block_input(blocks, &block_id, arg_id, value)?;
                    }
                }
                Ok(block_id)
            }
        }
    }

    fn emit_input(
        &mut self,
        blocks: &mut Map<String, Value>,
        input: &Input,
        parent_id: &str,
        var_ids: &HashMap<String, String>,
        list_ids: &HashMap<String, String>,
        shapes: &HashMap<String, FunctionShape>,
    ) -> Result<Option<Value>> {
        match input {
            Input::Number(value) => Ok(Some(json!([1, [4, format_num(*value)]]))),
            Input::Text(text) => Ok(Some(json!([1, [10, text]]))),
            Input::Broadcast(message) => {
                let menu_id = self.new_block_id();
                let broadcast_id = self.broadcast_id(message);
                blocks.insert(
                    menu_id.clone(),
                    json!({
                        "opcode": "event_broadcast_menu",
                        "next": Value::Null,
                        "parent": parent_id,
                        "inputs": {},
                        "fields": {"BROADCAST_OPTION": [message, broadcast_id]},
                        "shadow": true,
                        "topLevel": false
                    }),
                );
                Ok(Some(json!([1, menu_id])))
            }
            Input::Menu {
                opcode,
                field,
                value,
            } => {
                let menu_id = self.new_block_id();
                let mut fields_json = Map::new();
                fields_json.insert(field.to_string(), json!([value, Value::Null]));
                blocks.insert(
                    menu_id.clone(),
                    json!({
                        "opcode": opcode,
                        "next": Value::Null,
                        "parent": parent_id,
                        "inputs": {},
                        "fields": fields_json,
                        "shadow": true,
                        "topLevel": false
                    }),
                );
                Ok(Some(json!([1, menu_id])))
            }
            Input::Reporter(reporter) => {
                let id = self.emit_block(blocks, reporter, parent_id, var_ids, list_ids, shapes)?;
                Ok(Some(json!([2, id])))
            }
            Input::Substack(body) => {
                let (first, _) =
                    self.emit_block_chain(blocks, body, parent_id, var_ids, list_ids, shapes)?;
                Ok(first.map(|id| json!([2, id])))
            }
        }
    }

    fn build_costumes(&mut self, unit: &Unit, is_stage: bool) -> Result<Vec<Value>> {
        let mut out = Vec::new();
        let mut used_names: HashSet<String> = HashSet::new();
        if unit.costumes().is_empty() {
            let (svg, name) = if is_stage {
                (DEFAULT_STAGE_SVG, "backdrop1")
            } else {
                (DEFAULT_SPRITE_SVG, "costume1")
            };
            let data = svg.as_bytes().to_vec();
            let digest = format!("{:x}", md5::compute(&data));
            let md5ext = format!("{}.svg", digest);
            self.assets.insert(md5ext.clone(), data);
            out.push(json!({
                "name": name,
                "assetId": digest,
                "md5ext": md5ext,
                "dataFormat": "svg",
                "rotationCenterX": 0,
                "rotationCenterY": 0
            }));
            return Ok(out);
        }
        for costume in unit.costumes() {
            let file_path = self.assets_dir.join(&costume.path);
            if !file_path.is_file() {
                bail!(
                    "Costume file not found for unit '{}': '{}' resolved to '{}'.",
                    unit.name(),
                    costume.path,
                    file_path.display()
                );
            }
            let ext = file_path
                .extension()
                .and_then(|ext| ext.to_str())
                .unwrap_or("")
                .to_lowercase();
            if ext != "svg" && ext != "png" {
                bail!(
                    "Unsupported costume format '.{}' for '{}'. Only .svg and .png are supported.",
                    ext,
                    costume.path
                );
            }
            let data = fs::read(&file_path)?;
            let name = uniquify_costume_name(&costume.name, &mut used_names);
            let digest = format!("{:x}", md5::compute(&data));
            let md5ext = format!("{}.{}", digest, ext);
            self.assets.insert(md5ext.clone(), data);
            let mut entry = json!({
                "name": name,
                "assetId": digest,
                "md5ext": md5ext,
                "dataFormat": ext,
                "rotationCenterX": 0,
                "rotationCenterY": 0
            });
            if ext == "png" {
                merge_object(&mut entry, json!({"bitmapResolution": 1}))?;
            }
            out.push(entry);
        }
        Ok(out)
    }

    fn broadcast_id(&mut self, message: &str) -> String {
        if let Some(id) = self.broadcast_ids.get(message) {
            return id.clone();
        }
        let id = self.new_id("broadcast");
        self.broadcast_ids.insert(message.to_string(), id.clone());
        id
    }

    fn new_id(&mut self, prefix: &str) -> String {
        self.id_counter += 1;
        format!("{}_{}", prefix, self.id_counter)
    }

    fn new_block_id(&mut self) -> String {
        self.new_id("block")
    }
}

fn collect_messages_from_block(block: &Block, out: &mut HashSet<String>) {
    match block {
        Block::Op { inputs, .. } => {
            for (_, input) in inputs {
                collect_messages_from_input(input, out);
            }
        }
        Block::Call { args, .. } => {
            for arg in args {
                collect_messages_from_input(arg, out);
            }
        }
    }
}

fn collect_messages_from_input(input: &Input, out: &mut HashSet<String>) {
    match input {
        Input::Broadcast(message) => {
            out.insert(message.clone());
        }
        Input::Reporter(block) => collect_messages_from_block(block, out),
        Input::Substack(body) => {
            for block in body {
                collect_messages_from_block(block, out);
            }
        }
        Input::Number(_) | Input::Text(_) | Input::Menu { .. } => {}
    }
}

fn merge_object(dst: &mut Value, add: Value) -> Result<()> {
    let dst_obj = dst
        .as_object_mut()
        .ok_or_else(|| anyhow!("Expected object in merge_object dst"))?;
    let add_obj = add
        .as_object()
        .ok_or_else(|| anyhow!("Expected object in merge_object add"))?;
    for (key, value) in add_obj {
        dst_obj.insert(key.clone(), value.clone());
    }
    Ok(())
}

fn set_block_next(blocks: &mut Map<String, Value>, block_id: &str, next: Value) -> Result<()> {
    let block = blocks
        .get_mut(block_id)
        .ok_or_else(|| anyhow!("Missing block '{}'.", block_id))?;
    let obj = block
        .as_object_mut()
        .ok_or_else(|| anyhow!("Block '{}' is not an object.", block_id))?;
    obj.insert("next".to_string(), next);
    Ok(())
}

fn set_block_input(
    blocks: &mut Map<String, Value>,
    block_id: &str,
    key: &str,
    value: Value,
) -> Result<()> {
    let block = blocks
        .get_mut(block_id)
        .ok_or_else(|| anyhow!("Missing block '{}'.", block_id))?;
    let obj = block
        .as_object_mut()
        .ok_or_else(|| anyhow!("Block '{}' is not an object.", block_id))?;
    let inputs = obj
        .entry("inputs")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| anyhow!("Block '{}' has invalid inputs shape.", block_id))?;
    inputs.insert(key.to_string(), value);
    Ok(())
}

fn format_num(v: f64) -> String {
    if (v - v.round()).abs() < 1e-9 {
        format!("{}", v.round() as i64)
    } else {
        let s = format!("{:.6}", v);
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

fn uniquify_costume_name(base: &str, used: &mut HashSet<String>) -> String {
    let trimmed = base.trim();
    let base_name = if trimmed.is_empty() { "costume" } else { trimmed };
    let mut candidate = base_name.to_string();
    let mut suffix = 2usize;
    while !used.insert(candidate.to_lowercase()) {
        candidate = format!("{} {}", base_name, suffix);
        suffix += 1;
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Project, Unit};
    use crate::{codegen, parser, symbols};
    use std::io::Read;

    fn compile_unit(name: &str, source: &str, stage: Option<&symbols::SymbolTable>) -> (Unit, symbols::SymbolTable) {
        let ast = parser::parse(source).unwrap();
        let table = symbols::collect(&ast).unwrap();
        let scripts = codegen::lower(&ast, &table, stage).unwrap();
        (Unit::assemble(name, &table, scripts), table)
    }

    fn project_json(bytes: &[u8]) -> Value {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut file = archive.by_name("project.json").unwrap();
        let mut text = String::new();
        file.read_to_string(&mut text).unwrap();
        serde_json::from_str(&text).unwrap()
    }

    fn small_project() -> Project {
        let (stage, stage_table) =
            compile_unit("Stage", "list score\nwhen i receive [go]\n  add (1) to score\nend\n", None);
        let (sprite, _) = compile_unit(
            "cat",
            "var speed\nwhen flag clicked\n  set speed to (5)\n  broadcast [go]\n  add (speed) to score\nend\n",
            Some(&stage_table),
        );
        Project::assemble(stage, vec![sprite]).unwrap()
    }

    #[test]
    fn export_is_byte_identical_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let first = build_sb3_bytes(&small_project(), dir.path()).unwrap();
        let second = build_sb3_bytes(&small_project(), dir.path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn stage_target_comes_first_and_owns_broadcasts() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = build_sb3_bytes(&small_project(), dir.path()).unwrap();
        let json = project_json(&bytes);
        let targets = json["targets"].as_array().unwrap();
        assert_eq!(targets[0]["isStage"], true);
        assert_eq!(targets[0]["name"], "Stage");
        assert_eq!(targets[1]["name"], "cat");
        assert_eq!(targets[1]["layerOrder"], 1);
        let broadcasts = targets[0]["broadcasts"].as_object().unwrap();
        assert_eq!(broadcasts.len(), 1);
        assert!(broadcasts.values().any(|v| v == "go"));
        assert!(targets[1]["broadcasts"].as_object().unwrap().is_empty());
    }

    #[test]
    fn sprite_blocks_reference_the_stage_list_id() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = build_sb3_bytes(&small_project(), dir.path()).unwrap();
        let json = project_json(&bytes);
        let targets = json["targets"].as_array().unwrap();
        let stage_lists = targets[0]["lists"].as_object().unwrap();
        let (stage_list_id, _) = stage_lists.iter().next().unwrap();
        let sprite_blocks = targets[1]["blocks"].as_object().unwrap();
        let uses_stage_id = sprite_blocks.values().any(|block| {
            block["opcode"] == "data_addtolist"
                && block["fields"]["LIST"][1] == Value::String(stage_list_id.clone())
        });
        assert!(uses_stage_id);
    }

    #[test]
    fn units_without_costumes_get_a_default_asset() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = build_sb3_bytes(&small_project(), dir.path()).unwrap();
        let json = project_json(&bytes);
        let costumes = json["targets"][0]["costumes"].as_array().unwrap();
        assert_eq!(costumes.len(), 1);
        assert_eq!(costumes[0]["name"], "backdrop1");
        assert_eq!(costumes[0]["dataFormat"], "svg");
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes.as_slice())).unwrap();
        let md5ext = json["targets"][0]["costumes"][0]["md5ext"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(archive.by_name(&md5ext).is_ok());
    }

    #[test]
    fn declared_costume_is_packaged_by_digest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cat.svg"), DEFAULT_SPRITE_SVG).unwrap();
        let (stage, stage_table) = compile_unit("Stage", "", None);
        let (sprite, _) = compile_unit("cat", "costume \"cat.svg\"\n", Some(&stage_table));
        let project = Project::assemble(stage, vec![sprite]).unwrap();
        let bytes = build_sb3_bytes(&project, dir.path()).unwrap();
        let json = project_json(&bytes);
        let costume = &json["targets"][1]["costumes"][0];
        assert_eq!(costume["name"], "cat");
        let digest = format!("{:x}", md5::compute(DEFAULT_SPRITE_SVG.as_bytes()));
        assert_eq!(costume["assetId"], Value::String(digest));
    }

    #[test]
    fn missing_costume_file_fails_the_export() {
        let dir = tempfile::tempdir().unwrap();
        let (stage, stage_table) = compile_unit("Stage", "", None);
        let (sprite, _) = compile_unit("cat", "costume \"ghost.svg\"\n", Some(&stage_table));
        let project = Project::assemble(stage, vec![sprite]).unwrap();
        let err = build_sb3_bytes(&project, dir.path()).unwrap_err();
        assert!(err.to_string().contains("ghost.svg"));
    }

    #[test]
    fn function_definition_and_call_share_the_proccode() {
        let dir = tempfile::tempdir().unwrap();
        let (stage, stage_table) = compile_unit("Stage", "", None);
        let (sprite, _) = compile_unit(
            "cat",
            "define greet(name)\n  say (name)\nend\nwhen flag clicked\n  greet(\"hi\")\nend\n",
            Some(&stage_table),
        );
        let project = Project::assemble(stage, vec![sprite]).unwrap();
        let bytes = build_sb3_bytes(&project, dir.path()).unwrap();
        let json = project_json(&bytes);
        let blocks = json["targets"][1]["blocks"].as_object().unwrap();
        let prototype = blocks
            .values()
            .find(|b| b["opcode"] == "procedures_prototype")
            .unwrap();
        let call = blocks
            .values()
            .find(|b| b["opcode"] == "procedures_call")
            .unwrap();
        assert_eq!(prototype["mutation"]["proccode"], "greet %s");
        assert_eq!(
            prototype["mutation"]["proccode"],
            call["mutation"]["proccode"]
        );
        assert_eq!(
            prototype["mutation"]["argumentids"],
            call["mutation"]["argumentids"]
        );
    }

    #[test]
    fn statement_chains_are_linked_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let (stage, stage_table) = compile_unit("Stage", "", None);
        let (sprite, _) = compile_unit(
            "cat",
            "when flag clicked\n  show\n  hide\nend\n",
            Some(&stage_table),
        );
        let project = Project::assemble(stage, vec![sprite]).unwrap();
        let bytes = build_sb3_bytes(&project, dir.path()).unwrap();
        let json = project_json(&bytes);
        let blocks = json["targets"][1]["blocks"].as_object().unwrap();
        let hat = blocks
            .values()
            .find(|b| b["opcode"] == "event_whenflagclicked")
            .unwrap();
        let show_id = hat["next"].as_str().unwrap();
        assert_eq!(blocks[show_id]["opcode"], "looks_show");
        let hide_id = blocks[show_id]["next"].as_str().unwrap();
        assert_eq!(blocks[hide_id]["opcode"], "looks_hide");
        assert_eq!(blocks[hide_id]["next"], Value::Null);
    }
}
