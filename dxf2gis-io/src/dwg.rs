//! DWG 支持：调用外部转换器（ODA File Converter 或 LibreDWG `dwg2dxf`）生成临时 DXF。

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use dxf2gis_core::document::Drawing;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{DrawingLoader, DxfFacade, IoError};

const ODA_ENV: &str = "ODA_CONVERTER";
const ODA_NAMES: &[&str] = &[
    "ODAFileConverter",
    "ODAFileConverter.exe",
    "ODAFileConverter_x64.exe",
];
const LIBREDWG_NAMES: &[&str] = &["dwg2dxf", "dwg2dxf.exe"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConverterPreference {
    #[default]
    Auto,
    Oda,
    Libredwg,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DwgConverter {
    Oda(PathBuf),
    LibreDwg(PathBuf),
}

impl DwgConverter {
    pub fn label(&self) -> &'static str {
        match self {
            DwgConverter::Oda(_) => "oda",
            DwgConverter::LibreDwg(_) => "libredwg",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DwgFacade {
    preference: ConverterPreference,
    oda_path: Option<PathBuf>,
    dxf_version: String,
}

impl Default for DwgFacade {
    fn default() -> Self {
        Self::new(ConverterPreference::Auto, None)
    }
}

impl DwgFacade {
    pub fn new(preference: ConverterPreference, oda_path: Option<PathBuf>) -> Self {
        Self {
            preference,
            oda_path,
            dxf_version: "ACAD2013".to_string(),
        }
    }

    /// 按偏好返回可用的转换器，`Auto` 时 ODA 优先。
    pub fn detect(&self) -> Option<DwgConverter> {
        let oda = || find_oda(self.oda_path.as_deref()).map(DwgConverter::Oda);
        let libredwg = || find_on_path(LIBREDWG_NAMES).map(DwgConverter::LibreDwg);
        match self.preference {
            ConverterPreference::Oda => oda(),
            ConverterPreference::Libredwg => libredwg(),
            ConverterPreference::Auto => oda().or_else(libredwg),
        }
    }

    /// 将 DWG 转换到 `out_dir`，返回生成的 DXF 路径。
    pub fn convert(&self, dwg_path: &Path, out_dir: &Path) -> Result<PathBuf, IoError> {
        if !dwg_path.is_file() {
            return Err(IoError::Converter(format!(
                "找不到 DWG 文件: {}",
                dwg_path.display()
            )));
        }
        let candidates: Vec<DwgConverter> = match self.preference {
            ConverterPreference::Auto => [
                find_oda(self.oda_path.as_deref()).map(DwgConverter::Oda),
                find_on_path(LIBREDWG_NAMES).map(DwgConverter::LibreDwg),
            ]
            .into_iter()
            .flatten()
            .collect(),
            _ => self.detect().into_iter().collect(),
        };
        if candidates.is_empty() {
            return Err(IoError::Converter(
                "未找到 DWG 转换器：请安装 ODA File Converter（可设置 ODA_CONVERTER）或 LibreDWG dwg2dxf"
                    .to_string(),
            ));
        }

        let mut last_error = None;
        for converter in candidates {
            let result = match &converter {
                DwgConverter::Oda(exe) => self.convert_with_oda(exe, dwg_path, out_dir),
                DwgConverter::LibreDwg(exe) => convert_with_libredwg(exe, dwg_path, out_dir),
            };
            match result {
                Ok(path) => {
                    info!(converter = converter.label(), output = %path.display(), "DWG 已转换为 DXF");
                    return Ok(path);
                }
                Err(err) => {
                    warn!(converter = converter.label(), error = %err, "DWG 转换器执行失败");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| IoError::Converter("DWG 转换失败".to_string())))
    }

    fn convert_with_oda(&self, exe: &Path, dwg_path: &Path, out_dir: &Path) -> Result<PathBuf, IoError> {
        let absolute = dwg_path.canonicalize().map_err(|source| IoError::ReadError {
            path: dwg_path.to_path_buf(),
            source,
        })?;
        let in_folder = absolute.parent().unwrap_or_else(|| Path::new("."));
        let file_name = absolute
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let output = Command::new(exe)
            .arg(in_folder)
            .arg(out_dir)
            .arg(&self.dxf_version)
            .arg("DXF")
            .arg("0")
            .arg("1")
            .arg(&file_name)
            .output()
            .map_err(|err| IoError::Converter(format!("无法启动 {}: {err}", exe.display())))?;
        if !output.status.success() {
            return Err(IoError::Converter(format!(
                "ODA File Converter 退出码 {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stdout).trim()
            )));
        }
        let stem = absolute
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        find_dxf_output(out_dir, &stem)
            .ok_or_else(|| IoError::Converter("ODA 转换结束但没有生成 DXF".to_string()))
    }
}

impl DrawingLoader for DwgFacade {
    fn load(&self, path: &Path) -> Result<Drawing, IoError> {
        let workdir = tempfile::Builder::new()
            .prefix("dwg2dxf_")
            .tempdir()
            .map_err(|source| IoError::WriteError {
                path: env::temp_dir(),
                source,
            })?;
        let dxf_path = self.convert(path, workdir.path())?;
        // 临时目录随 `workdir` 释放而删除
        DxfFacade::new().load(&dxf_path)
    }
}

fn convert_with_libredwg(exe: &Path, dwg_path: &Path, out_dir: &Path) -> Result<PathBuf, IoError> {
    let stem = dwg_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "drawing".to_string());
    let out_path = out_dir.join(format!("{stem}.dxf"));
    let output = Command::new(exe)
        .arg("-o")
        .arg(&out_path)
        .arg(dwg_path)
        .output()
        .map_err(|err| IoError::Converter(format!("无法启动 {}: {err}", exe.display())))?;
    if !output.status.success() || !out_path.is_file() {
        return Err(IoError::Converter(format!(
            "dwg2dxf 退出码 {:?}: {}",
            output.status.code(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(out_path)
}

fn find_oda(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit.filter(|path| path.is_file()) {
        return Some(path.to_path_buf());
    }
    if let Some(path) = env::var_os(ODA_ENV).map(PathBuf::from) {
        if path.is_file() {
            return Some(path);
        }
    }
    find_on_path(ODA_NAMES)
}

fn find_on_path(names: &[&str]) -> Option<PathBuf> {
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .flat_map(|dir| names.iter().map(move |name| dir.join(name)))
        .find(|candidate| candidate.is_file())
}

/// ODA 某些版本会写入子目录，按文件名（不区分大小写）递归查找，找不到时退回任意 DXF。
fn find_dxf_output(out_dir: &Path, stem: &str) -> Option<PathBuf> {
    let expected = out_dir.join(format!("{stem}.dxf"));
    if expected.is_file() {
        return Some(expected);
    }
    let mut found = Vec::new();
    collect_dxf_files(out_dir, &mut found);
    found.sort();
    let matching = found.iter().find(|path| {
        path.file_stem()
            .map(|candidate| candidate.to_string_lossy().eq_ignore_ascii_case(stem))
            .unwrap_or(false)
    });
    matching.cloned().or_else(|| found.into_iter().next())
}

fn collect_dxf_files(dir: &Path, found: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_dxf_files(&path, found);
        } else if path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("dxf"))
            .unwrap_or(false)
        {
            found.push(path);
        }
    }
}
