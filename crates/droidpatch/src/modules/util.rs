use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use crate::error::{Error, Result};
use crate::executor::ExecCtx;

// Never creates the target: the host owns file lifecycles.
fn append_text(ctx: &mut ExecCtx, path: &Path, text: &str) -> Result<()> {
    if ctx.dry_run {
        ctx.log(&format!(
            "DRY-RUN: append {} bytes to {}",
            text.len(),
            path.display()
        ));
        return Ok(());
    }

    let mut f = OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(|e| Error::io_at(path, e))?;
    f.write_all(text.as_bytes())
        .map_err(|e| Error::io_at(path, e))?;
    tracing::debug!(path = %path.display(), bytes = text.len(), "appended");
    ctx.record_touched(path);
    Ok(())
}

/// Append each line followed by `\n`, in order.
pub fn append_lines(ctx: &mut ExecCtx, path: &Path, lines: &[&str]) -> Result<()> {
    let mut text = String::new();
    for line in lines {
        text.push_str(line);
        text.push('\n');
    }
    append_text(ctx, path, &text)?;
    ctx.log(&format!("appended {} lines to {}", lines.len(), path.display()));
    Ok(())
}

/// Append a blank line, the marker comment, then `key=value` lines in order.
/// Values are written as-is, with no quoting or escaping.
pub fn append_prop_block(
    ctx: &mut ExecCtx,
    path: &Path,
    marker: &str,
    props: &[(&str, &str)],
) -> Result<()> {
    let mut text = format!("\n{marker}\n");
    for (key, value) in props {
        text.push_str(key);
        text.push('=');
        text.push_str(value);
        text.push('\n');
    }
    append_text(ctx, path, &text)?;
    ctx.log(&format!(
        "appended {} properties to {}",
        props.len(),
        path.display()
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Arc;

    use crate::executor::NullSink;

    fn ctx(dry_run: bool) -> ExecCtx {
        ExecCtx::new(dry_run, Arc::new(NullSink))
    }

    #[test]
    fn append_lines_terminates_every_line() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("policy.cil");
        fs::write(&p, "(existing)").unwrap();

        let mut ctx = ctx(false);
        append_lines(&mut ctx, &p, &["a", "b"]).unwrap();
        assert_eq!(fs::read_to_string(&p).unwrap(), "(existing)a\nb\n");
        assert_eq!(ctx.touched(), &[p.clone()]);
    }

    #[test]
    fn append_does_not_create_missing_files() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("missing.cil");

        let err = append_lines(&mut ctx(false), &p, &["a"]).unwrap_err();
        assert_eq!(err.io_kind(), Some(std::io::ErrorKind::NotFound));
        assert!(!p.exists());
    }

    #[test]
    fn prop_block_starts_with_blank_line_and_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("build.prop");
        fs::write(&p, "ro.a=1\n").unwrap();

        append_prop_block(&mut ctx(false), &p, "# marker", &[("k", "v w"), ("x", "")]).unwrap();
        assert_eq!(
            fs::read_to_string(&p).unwrap(),
            "ro.a=1\n\n# marker\nk=v w\nx=\n"
        );
    }

    #[test]
    fn dry_run_leaves_files_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("build.prop");
        fs::write(&p, "ro.a=1\n").unwrap();

        let mut ctx = ctx(true);
        append_prop_block(&mut ctx, &p, "# marker", &[("k", "v")]).unwrap();
        assert_eq!(fs::read_to_string(&p).unwrap(), "ro.a=1\n");
        assert!(ctx.touched().is_empty());
    }
}
