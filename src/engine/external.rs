use super::{types::*, Engine};
use crate::config::{ColorProfile, Config, RasterColorMode};
use crate::error::NormalizeError;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const DOCTOR_TIMEOUT: Duration = Duration::from_secs(10);

/// Drives poppler (`pdfimages`, `pdftoppm`), Ghostscript and `img2pdf`.
pub struct ExternalEngine {
    cfg: Config,
}

impl ExternalEngine {
    pub fn new(cfg: &Config) -> Self {
        Self { cfg: cfg.clone() }
    }

    fn run_tool(
        &self,
        tool: &str,
        exe: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<Output, NormalizeError> {
        debug!("{tool} run {exe} {} timeout={:?}", args.join(" "), timeout);
        let mut cmd = Command::new(exe);
        cmd.args(args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                NormalizeError::tool(tool, format!("{exe} not found on PATH"))
            } else {
                NormalizeError::tool(tool, format!("spawning {exe}: {e}"))
            }
        })?;

        let output = wait_with_timeout(tool, &mut child, timeout)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(NormalizeError::tool(
                tool,
                format!("exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        if self.cfg.tools.keep_stderr && !output.stderr.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("{tool} stderr: {}", stderr.trim());
        }

        Ok(output)
    }

    fn tool_version(&self, tool: &str, exe: &str, flag: &str) -> ToolDiag {
        let mut diag = ToolDiag {
            tool: tool.to_string(),
            exe: exe.to_string(),
            ok: false,
            version: None,
            error: None,
        };
        let child = Command::new(exe)
            .arg(flag)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();
        let mut child = match child {
            Ok(c) => c,
            Err(e) => {
                diag.error = Some(e.to_string());
                return diag;
            }
        };
        // poppler prints its version to stderr and some builds exit 99 for -v.
        match wait_with_timeout(tool, &mut child, DOCTOR_TIMEOUT) {
            Ok(out) => {
                diag.ok = true;
                diag.version = first_line(&out.stdout).or_else(|| first_line(&out.stderr));
            }
            Err(e) => diag.error = Some(e.to_string()),
        }
        diag
    }
}

fn first_line(bytes: &[u8]) -> Option<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

impl Engine for ExternalEngine {
    fn doctor(&self) -> Vec<ToolDiag> {
        let t = &self.cfg.tools;
        vec![
            self.tool_version("pdfimages", &t.pdfimages, "-v"),
            self.tool_version("ghostscript", &t.ghostscript, "--version"),
            self.tool_version("pdftoppm", &t.pdftoppm, "-v"),
            self.tool_version("img2pdf", &t.img2pdf, "--version"),
        ]
    }

    fn list_images(&self, input: &Path) -> Result<String, NormalizeError> {
        let args = vec!["-list".to_string(), input.display().to_string()];
        let out = self.run_tool(
            "pdfimages",
            &self.cfg.tools.pdfimages,
            &args,
            secs(self.cfg.tools.inspect_timeout_seconds),
        )?;
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }

    fn rewrite(&self, req: &RewriteIn) -> Result<(), NormalizeError> {
        let args = ghostscript_args(req);
        self.run_tool(
            "ghostscript",
            &self.cfg.tools.ghostscript,
            &args,
            secs(self.cfg.tools.rewrite_timeout_seconds),
        )?;
        if !req.output.exists() {
            return Err(NormalizeError::tool(
                "ghostscript",
                format!("exited 0 but wrote no output: {}", req.output.display()),
            ));
        }
        Ok(())
    }

    fn rasterize(&self, req: &RasterizeIn) -> Result<(), NormalizeError> {
        let args = pdftoppm_args(req);
        self.run_tool(
            "pdftoppm",
            &self.cfg.tools.pdftoppm,
            &args,
            secs(self.cfg.tools.raster_timeout_seconds),
        )?;
        Ok(())
    }

    fn assemble(&self, pages: &[PathBuf], output: &Path) -> Result<(), NormalizeError> {
        let mut args: Vec<String> = pages.iter().map(|p| p.display().to_string()).collect();
        args.push("-o".to_string());
        args.push(output.display().to_string());
        self.run_tool(
            "img2pdf",
            &self.cfg.tools.img2pdf,
            &args,
            secs(self.cfg.tools.assemble_timeout_seconds),
        )?;
        Ok(())
    }
}

pub fn ghostscript_args(req: &RewriteIn) -> Vec<String> {
    let mut args = vec![
        "-sDEVICE=pdfwrite".to_string(),
        format!("-dCompatibilityLevel={}", req.compatibility_level),
    ];
    if let Some(settings) = &req.pdf_settings {
        args.push(format!("-dPDFSETTINGS={settings}"));
    }
    args.extend(
        ["-dNOPAUSE", "-dQUIET", "-dBATCH", "-dSAFER"]
            .iter()
            .map(|s| s.to_string()),
    );

    match req.color_profile {
        ColorProfile::Preserve => {}
        ColorProfile::Gray => {
            args.push("-sColorConversionStrategy=Gray".into());
            args.push("-dProcessColorModel=/DeviceGray".into());
        }
        ColorProfile::Rgb => {
            args.push("-sColorConversionStrategy=RGB".into());
            args.push("-dProcessColorModel=/DeviceRGB".into());
        }
    }

    if let Some(images) = &req.images {
        for channel in ["Color", "Gray", "Mono"] {
            args.push(format!("-d{channel}ImageResolution={}", images.resolution));
        }
        match images.downsample {
            DownsamplePolicy::Preserve => {
                for channel in ["Color", "Gray", "Mono"] {
                    args.push(format!("-dDownsample{channel}Images=false"));
                }
                args.push("-dAutoFilterColorImages=false".into());
                args.push("-dAutoFilterGrayImages=false".into());
                args.push("-dPassThroughJPEGImages=true".into());
            }
            DownsamplePolicy::Resample { filter } => {
                for channel in ["Color", "Gray", "Mono"] {
                    args.push(format!("-dDownsample{channel}Images=true"));
                    args.push(format!("-d{channel}ImageDownsampleType={}", filter.as_gs()));
                    // Default threshold (1.5) would leave images up to 450 dpi alone at 300.
                    args.push(format!("-d{channel}ImageDownsampleThreshold=1.0"));
                }
            }
        }
    }

    args.push(format!("-sOutputFile={}", req.output.display()));
    args.push(req.input.display().to_string());
    args
}

pub fn pdftoppm_args(req: &RasterizeIn) -> Vec<String> {
    let mut args = vec!["-r".to_string(), req.dpi.to_string()];
    match req.color_mode {
        RasterColorMode::Color => {}
        RasterColorMode::Gray => args.push("-gray".into()),
        RasterColorMode::Mono => args.push("-mono".into()),
    }
    args.push("-png".into());
    args.push(req.input.display().to_string());
    args.push(req.output_prefix.display().to_string());
    args
}

fn wait_with_timeout(
    tool: &str,
    child: &mut Child,
    timeout: Duration,
) -> Result<Output, NormalizeError> {
    // Drain pipes while waiting so chatty tools can't deadlock on a full buffer.
    let stdout_reader = child.stdout.take();
    let stderr_reader = child.stderr.take();

    let stdout_thread = std::thread::spawn(move || -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        if let Some(mut out) = stdout_reader {
            out.read_to_end(&mut buf)?;
        }
        Ok(buf)
    });

    let stderr_thread = std::thread::spawn(move || -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        if let Some(mut err) = stderr_reader {
            err.read_to_end(&mut buf)?;
        }
        Ok(buf)
    });

    let join = |h: std::thread::JoinHandle<std::io::Result<Vec<u8>>>,
                what: &str|
     -> Result<Vec<u8>, NormalizeError> {
        h.join()
            .map_err(|_| NormalizeError::tool(tool, format!("{what} reader thread panicked")))?
            .map_err(NormalizeError::from)
    };

    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            let stdout = join(stdout_thread, "stdout")?;
            let stderr = join(stderr_thread, "stderr")?;
            return Ok(Output {
                status,
                stdout,
                stderr,
            });
        }

        if start.elapsed() > timeout {
            warn!("{tool} timed out after {:?}", timeout);
            let _ = child.kill();
            child.wait()?;
            let _ = join(stdout_thread, "stdout");
            let stderr = join(stderr_thread, "stderr").unwrap_or_default();
            return Err(NormalizeError::tool(
                tool,
                format!(
                    "exceeded timeout ({:?}); stderr: {}",
                    timeout,
                    String::from_utf8_lossy(&stderr).trim()
                ),
            ));
        }

        std::thread::sleep(Duration::from_millis(50));
    }
}
