//! dcall - call native library functions from the command line
//!
//! Thin front end over the downcall library: resolve a symbol, describe its
//! layout with C-style signature text, and invoke it.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use downcall::{
    parse_signature, parse_type, Arg, DowncallConfig, LayoutDescriptor, LayoutKind, Leaf,
    Library, LibraryLoader, Linker, ManagedSignature, NativeRegion, ScalarKind, Value,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dcall")]
#[command(version)]
#[command(about = "Descriptor-driven native call bridge", long_about = None)]
struct Cli {
    /// Bind every call to the generic (libffi) path
    #[arg(long, global = true)]
    no_spec: bool,

    /// Configuration file (default: downcall.toml in this or a parent directory)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Invoke a native function
    Call {
        /// Library name or path
        #[arg(long)]
        lib: String,

        /// C-style signature, e.g. "long labs(long)"
        #[arg(long)]
        sig: String,

        /// Arguments; a struct argument is its leaf values joined by commas
        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Print the address a symbol resolves to
    Resolve {
        /// Library name or path
        #[arg(long)]
        lib: String,

        /// Exported symbol
        symbol: String,
    },

    /// Print size, alignment and field offsets of a type
    Layout {
        /// Type text, e.g. "struct{char, double}"
        ty: String,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => DowncallConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => DowncallConfig::load_from_cwd().context("Failed to load downcall.toml")?,
    };
    config.apply_env();
    if cli.no_spec {
        config.linker.no_spec = true;
    }

    match cli.command {
        Commands::Call { lib, sig, args } => cmd_call(&config, &lib, &sig, &args),
        Commands::Resolve { lib, symbol } => cmd_resolve(&config, &lib, &symbol),
        Commands::Layout { ty } => cmd_layout(&ty),
    }
}

fn load_library(config: &DowncallConfig, name: &str) -> Result<Library> {
    let mut loader = LibraryLoader::new();
    for path in config.search_paths() {
        loader.add_search_path(path);
    }
    loader
        .load(name)
        .with_context(|| format!("Failed to load library '{}'", name))
}

fn cmd_call(config: &DowncallConfig, lib: &str, sig: &str, args: &[String]) -> Result<()> {
    let parsed = parse_signature(sig).context("Invalid signature")?;
    let function = parsed.function;
    if args.len() != function.argument_layouts().len() {
        bail!(
            "{} takes {} arguments, {} given",
            parsed.name,
            function.argument_layouts().len(),
            args.len()
        );
    }

    let library = load_library(config, lib)?;
    let address = library.lookup(&parsed.name)?;
    let linker = Linker::from_config(config);
    let managed = ManagedSignature::for_function(&function);
    let handle = linker.bind(address, &managed, &function)?;

    // Struct arguments are materialised first so the Arg list can borrow them.
    let mut regions = Vec::new();
    for (text, layout) in args.iter().zip(function.argument_layouts()) {
        if layout.is_struct() {
            regions.push(struct_argument(layout, text)?);
        }
    }

    let mut call_args = Vec::with_capacity(args.len());
    let mut next_region = regions.iter();
    for (i, (text, layout)) in args.iter().zip(function.argument_layouts()).enumerate() {
        let arg = match leaf_of(layout) {
            Some(leaf) => Arg::Value(parse_value(leaf, text, i)?),
            None => match next_region.next() {
                Some(region) => Arg::Region(region),
                None => bail!("argument {} has no struct region", i),
            },
        };
        call_args.push(arg);
    }

    let mut ret_region = match function.return_layout() {
        Some(layout) if layout.is_struct() => Some(NativeRegion::allocate(layout)?),
        _ => None,
    };

    // SAFETY: the handle was bound from the same descriptor the arguments
    // were parsed against, every struct region was allocated from its
    // layout, and the result region (if any) from the return layout.
    let result = unsafe { handle.invoke(&call_args, ret_region.as_mut()) };

    match (result, ret_region, function.return_layout()) {
        (Some(value), _, _) => println!("{}", value),
        (None, Some(region), Some(layout)) => {
            let values = layout
                .leaves()
                .into_iter()
                .map(|(offset, leaf)| read_leaf(&region, offset as usize, leaf).map(|v| v.to_string()))
                .collect::<Result<Vec<_>>>()?;
            println!("{{{}}}", values.join(", "));
        }
        _ => {}
    }

    Ok(())
}

fn cmd_resolve(config: &DowncallConfig, lib: &str, symbol: &str) -> Result<()> {
    let library = load_library(config, lib)?;
    let address = library.lookup(symbol)?;
    println!("{} {} ({})", symbol, address.address(), library.path().display());
    Ok(())
}

fn cmd_layout(text: &str) -> Result<()> {
    let Some(layout) = parse_type(text).context("Invalid type")? else {
        bail!("void has no layout");
    };
    println!("{}", layout);
    println!("  size:  {}", layout.size());
    println!("  align: {}", layout.align());
    if layout.is_struct() {
        for (i, field) in layout.fields().iter().enumerate() {
            println!(
                "  [{}] offset {:>3}  size {:>3}  {}",
                i,
                field.offset,
                field.layout.size(),
                field.layout
            );
        }
    }
    Ok(())
}

fn leaf_of(layout: &LayoutDescriptor) -> Option<Leaf> {
    match layout.kind() {
        LayoutKind::Scalar(kind) => Some(Leaf::Scalar(*kind)),
        LayoutKind::Pointer => Some(Leaf::Pointer),
        LayoutKind::Struct(_) => None,
    }
}

fn parse_value(leaf: Leaf, text: &str, index: usize) -> Result<Value> {
    Value::parse(leaf, text)
        .with_context(|| format!("argument {}: '{}' is not a valid {}", index, text, leaf_name(leaf)))
}

fn leaf_name(leaf: Leaf) -> String {
    match leaf {
        Leaf::Scalar(kind) => kind.to_string(),
        Leaf::Pointer => "pointer".to_string(),
    }
}

/// Fill a region from `"v0,v1,..."`, one value per leaf
fn struct_argument(layout: &LayoutDescriptor, text: &str) -> Result<NativeRegion> {
    let leaves = layout.leaves();
    let parts: Vec<&str> = text.split(',').map(str::trim).collect();
    if parts.len() != leaves.len() {
        bail!(
            "{} needs {} comma-separated values, got {}",
            layout,
            leaves.len(),
            parts.len()
        );
    }

    let mut region = NativeRegion::allocate(layout)?;
    for (i, ((offset, leaf), part)) in leaves.into_iter().zip(parts).enumerate() {
        let value = Value::parse(leaf, part)
            .with_context(|| format!("struct field {}: '{}' is not a valid {}", i, part, leaf_name(leaf)))?;
        write_value(&mut region, offset as usize, value)?;
    }
    Ok(region)
}

fn write_value(region: &mut NativeRegion, offset: usize, value: Value) -> Result<()> {
    match value {
        Value::I8(v) => region.write(offset, v)?,
        Value::I16(v) => region.write(offset, v)?,
        Value::I32(v) => region.write(offset, v)?,
        Value::I64(v) => region.write(offset, v)?,
        Value::U8(v) => region.write(offset, v)?,
        Value::U16(v) => region.write(offset, v)?,
        Value::U32(v) => region.write(offset, v)?,
        Value::U64(v) => region.write(offset, v)?,
        Value::F32(v) => region.write(offset, v)?,
        Value::F64(v) => region.write(offset, v)?,
        Value::Address(v) => region.write(offset, v)?,
    }
    Ok(())
}

fn read_leaf(region: &NativeRegion, offset: usize, leaf: Leaf) -> Result<Value> {
    let value = match leaf {
        Leaf::Pointer => Value::Address(region.read(offset)?),
        Leaf::Scalar(kind) => match kind {
            ScalarKind::I8 => Value::I8(region.read(offset)?),
            ScalarKind::I16 => Value::I16(region.read(offset)?),
            ScalarKind::I32 => Value::I32(region.read(offset)?),
            ScalarKind::I64 => Value::I64(region.read(offset)?),
            ScalarKind::U8 => Value::U8(region.read(offset)?),
            ScalarKind::U16 => Value::U16(region.read(offset)?),
            ScalarKind::U32 => Value::U32(region.read(offset)?),
            ScalarKind::U64 => Value::U64(region.read(offset)?),
            ScalarKind::F32 => Value::F32(region.read(offset)?),
            ScalarKind::F64 => Value::F64(region.read(offset)?),
        },
    };
    Ok(value)
}
