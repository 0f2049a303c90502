use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use num_traits::ToPrimitive;
use param_adjoint::{Cell, Element, Float, Mesh, MeshInfo, Parameter};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CheckpointError, Result};

/// How a [`CheckpointFile`] is opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileMode {
    /// Existing file, no writes.
    Read,
    /// New or truncated file.
    Write,
    /// Existing file extended in place; created if missing.
    Append,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Contents {
    meshes: BTreeMap<String, MeshEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MeshEntry {
    cell: Cell,
    #[serde(default)]
    spaces: BTreeMap<String, Element>,
    #[serde(default)]
    functions: BTreeMap<String, StoredFunction>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredFunction {
    space: String,
    shape: Vec<usize>,
    values: Vec<f64>,
}

/// A checkpoint file holding named meshes, function spaces and functions.
///
/// Every function is stored under the mesh it was saved against, so the same
/// name may appear on several meshes. Values are kept as `f64` regardless of
/// the parameter's float type.
///
/// Changes are written by [`flush`](Self::flush), [`close`](Self::close) or,
/// as a last resort, on drop.
#[derive(Debug)]
pub struct CheckpointFile {
    path: PathBuf,
    mode: FileMode,
    contents: Contents,
    dirty: bool,
}

impl CheckpointFile {
    /// Open `path` in `mode`.
    pub fn open(path: impl AsRef<Path>, mode: FileMode) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let (contents, dirty) = match mode {
            FileMode::Read => (read_contents(&path)?, false),
            FileMode::Write => (Contents::default(), true),
            FileMode::Append if path.exists() => (read_contents(&path)?, false),
            FileMode::Append => (Contents::default(), true),
        };
        debug!(path = %path.display(), ?mode, meshes = contents.meshes.len(), "checkpoint file opened");
        Ok(CheckpointFile {
            path,
            mode,
            contents,
            dirty,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> FileMode {
        self.mode
    }

    fn writable(&self) -> Result<()> {
        if self.mode == FileMode::Read {
            return Err(CheckpointError::ReadOnly(self.path.clone()));
        }
        Ok(())
    }

    /// Record `mesh`. Saving a mesh twice is fine as long as its cell agrees.
    pub fn save_mesh(&mut self, mesh: &impl Mesh) -> Result<()> {
        self.writable()?;
        if let Some(entry) = self.contents.meshes.get(mesh.name()) {
            if entry.cell != mesh.cell() {
                return Err(CheckpointError::CellMismatch {
                    mesh: mesh.name().to_owned(),
                    saved: entry.cell,
                    given: mesh.cell(),
                });
            }
            return Ok(());
        }
        self.contents.meshes.insert(
            mesh.name().to_owned(),
            MeshEntry {
                cell: mesh.cell(),
                spaces: BTreeMap::new(),
                functions: BTreeMap::new(),
            },
        );
        self.dirty = true;
        Ok(())
    }

    /// Names of the saved meshes.
    pub fn mesh_names(&self) -> Vec<&str> {
        self.contents.meshes.keys().map(String::as_str).collect()
    }

    /// Rebuild the descriptor of a saved mesh.
    pub fn load_mesh(&self, name: &str) -> Result<MeshInfo> {
        let entry = self.mesh_entry(name)?;
        Ok(MeshInfo::new(name, entry.cell))
    }

    fn mesh_entry(&self, name: &str) -> Result<&MeshEntry> {
        self.contents
            .meshes
            .get(name)
            .ok_or_else(|| CheckpointError::MissingMesh(name.to_owned()))
    }

    /// Save `parameter` against `mesh`, together with the mesh and the
    /// parameter's function space on it. Overwrites a function of the same name.
    pub fn save_parameter<F: Float>(&mut self, parameter: &Parameter<F>, mesh: &impl Mesh) -> Result<()> {
        self.writable()?;
        let name = parameter.name().ok_or(CheckpointError::Unnamed)?.to_owned();
        self.save_mesh(mesh)?;

        let space = parameter.function_space(mesh);
        let space_name = space.name();
        let values = parameter
            .values()
            .iter()
            .map(|v| v.to_f64().ok_or(CheckpointError::Conversion))
            .collect::<Result<Vec<f64>>>()?;

        let entry = self
            .contents
            .meshes
            .get_mut(mesh.name())
            .ok_or_else(|| CheckpointError::MissingMesh(mesh.name().to_owned()))?;
        entry
            .spaces
            .insert(space_name.clone(), space.element().clone());
        entry.functions.insert(
            name.clone(),
            StoredFunction {
                space: space_name,
                shape: parameter.shape().to_vec(),
                values,
            },
        );
        self.dirty = true;
        debug!(function = %name, mesh = mesh.name(), "parameter saved");
        Ok(())
    }

    /// Load the function `name` saved on `mesh_name` as a named parameter.
    pub fn load_parameter<F: Float>(&self, name: &str, mesh_name: &str) -> Result<Parameter<F>> {
        let entry = self.mesh_entry(mesh_name)?;
        let stored = entry
            .functions
            .get(name)
            .ok_or_else(|| CheckpointError::MissingFunction {
                mesh: mesh_name.to_owned(),
                name: name.to_owned(),
            })?;
        let element = entry
            .spaces
            .get(&stored.space)
            .ok_or_else(|| CheckpointError::MissingSpace {
                name: name.to_owned(),
                space: stored.space.clone(),
            })?;
        if element.value_shape() != stored.shape.as_slice() {
            warn!(function = name, space = %stored.space, "stored shape disagrees with its function space");
        }

        let values = stored
            .values
            .iter()
            .map(|&v| F::from_f64(v).ok_or(CheckpointError::Conversion))
            .collect::<Result<Vec<F>>>()?;
        let mut parameter = Parameter::from_shape_vec(&stored.shape, values)?;
        parameter.set_name(Some(name.to_owned()));
        debug!(function = name, mesh = mesh_name, "parameter loaded");
        Ok(parameter)
    }

    /// Names of the functions saved on `mesh_name`.
    pub fn function_names(&self, mesh_name: &str) -> Result<Vec<&str>> {
        let entry = self.mesh_entry(mesh_name)?;
        Ok(entry.functions.keys().map(String::as_str).collect())
    }

    /// Write pending changes to disk.
    pub fn flush(&mut self) -> Result<()> {
        if !self.dirty || self.mode == FileMode::Read {
            return Ok(());
        }
        let bytes = serde_json::to_vec_pretty(&self.contents)?;
        std::fs::write(&self.path, bytes)?;
        self.dirty = false;
        debug!(path = %self.path.display(), "checkpoint file written");
        Ok(())
    }

    /// Flush and close. A failed write is reported here and not retried on drop.
    pub fn close(mut self) -> Result<()> {
        self.finish()
    }

    fn finish(&mut self) -> Result<()> {
        let flushed = self.flush();
        self.dirty = false;
        flushed
    }
}

impl Drop for CheckpointFile {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(path = %self.path.display(), error = %e, "checkpoint file not written on drop");
        }
    }
}

fn read_contents(path: &Path) -> Result<Contents> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}
