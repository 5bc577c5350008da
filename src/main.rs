use std::fs;
use std::sync::Arc;

use anyhow::Context;
use datalog_query_builder::ast::Node;
use datalog_query_builder::config::{BuilderConfig, DEFAULT_CONFIG_FILE};
use datalog_query_builder::{CompiledQuery, DatalogCompiler};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing_subscriber::{fmt, EnvFilter};

const HELP: &str = r#"输入一行 JSON 过滤树, 例如:
  {"matchMode": "all", "children": [{"kind": "tags", "value": "work"}]}
命令:
  :load <文件>   从文件读取过滤树
  :help          显示帮助
  :quit          退出"#;

/// 创建编译器实例，优先使用JSON配置，失败时使用默认配置
fn create_compiler_with_config() -> DatalogCompiler {
    match BuilderConfig::from_json_file(DEFAULT_CONFIG_FILE) {
        Ok(config) => {
            println!("✅ 成功从JSON配置文件加载配置: {}", DEFAULT_CONFIG_FILE);
            println!("✅ 加载了 {} 个属性 schema", config.properties.len());
            for (name, schema) in &config.properties {
                println!("  {} -> {} ({:?})", name, schema.ident, schema.value_type);
            }
            let mut compiler = DatalogCompiler::with_config(config.compiler.clone());
            compiler.set_schema_lookup(Arc::new(config.schema_lookup()));
            compiler
        }
        Err(e) => {
            println!("⚠️ 无法加载JSON配置文件 ({}), 使用默认配置", e);
            DatalogCompiler::new()
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).compact().init();
}

/// 解析过滤树并编译, 打印两种形式的查询
fn compile_and_print(compiler: &DatalogCompiler, source: &str) -> anyhow::Result<()> {
    let tree: Node = serde_json::from_str(source).context("无法解析过滤树 JSON")?;
    match compiler.compile(&tree) {
        Some(query) => print_query(&query),
        None => println!("没有有效的过滤条件, 无法生成查询。"),
    }
    Ok(())
}

fn print_query(query: &CompiledQuery) {
    println!("\n[可复制的查询]:");
    println!("{}", query.wrapped);
    println!("\n[原始查询]:");
    println!("{}", query.raw);
}

/// 处理一行输入, 返回 false 表示退出
fn handle_line(compiler: &DatalogCompiler, line: &str) -> anyhow::Result<bool> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(true);
    }

    match line.split_once(char::is_whitespace).unwrap_or((line, "")) {
        (":quit" | ":q", _) => return Ok(false),
        (":help", _) => println!("{}", HELP),
        (":load", path) => {
            let path = path.trim();
            let source = fs::read_to_string(path).with_context(|| format!("无法读取文件 {}", path))?;
            compile_and_print(compiler, &source)?;
        }
        _ => compile_and_print(compiler, line)?,
    }
    Ok(true)
}

fn run_repl(compiler: &DatalogCompiler) -> anyhow::Result<()> {
    let mut editor = DefaultEditor::new()?;
    println!("\n{}", HELP);

    loop {
        match editor.readline("query> ") {
            Ok(line) => {
                editor.add_history_entry(line.as_str())?;
                match handle_line(compiler, &line) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => println!("✗ {:#}", e),
                }
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    println!("--- Datalog Query Builder: 过滤树到 Datalog 编译器 ---");

    println!("\n[配置信息]:");
    let compiler = create_compiler_with_config();

    // 指定文件时只编译一次, 否则进入交互模式
    if let Some(path) = std::env::args().nth(1) {
        let source = fs::read_to_string(&path).with_context(|| format!("无法读取文件 {}", path))?;
        return compile_and_print(&compiler, &source);
    }

    run_repl(&compiler)
}
