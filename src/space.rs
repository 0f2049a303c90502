//! Function-space reconstruction against a mesh.
//!
//! A parameter is spatially constant, so its element is the real family of
//! degree zero. Reinterpreting it on a mesh only swaps the reference cell.

use std::fmt;

/// Reference cell of a mesh.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Cell {
    /// 1-d segment.
    Interval,
    /// 2-d simplex.
    Triangle,
    /// 2-d tensor-product cell.
    Quadrilateral,
    /// 3-d simplex.
    Tetrahedron,
    /// 3-d tensor-product cell.
    Hexahedron,
}

impl Cell {
    /// Topological dimension of the cell.
    pub fn topological_dimension(self) -> usize {
        match self {
            Cell::Interval => 1,
            Cell::Triangle | Cell::Quadrilateral => 2,
            Cell::Tetrahedron | Cell::Hexahedron => 3,
        }
    }

    /// Lower-case cell name.
    pub fn name(self) -> &'static str {
        match self {
            Cell::Interval => "interval",
            Cell::Triangle => "triangle",
            Cell::Quadrilateral => "quadrilateral",
            Cell::Tetrahedron => "tetrahedron",
            Cell::Hexahedron => "hexahedron",
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Finite-element family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Family {
    /// Global constants ("R").
    Real,
    /// Continuous Lagrange ("P" on simplices, "Q" on tensor cells).
    Lagrange,
    /// Discontinuous Lagrange ("DP" / "DQ").
    DiscontinuousLagrange,
}

impl Family {
    /// Short family name as used in space names.
    pub fn short_name(self, cell: Option<Cell>) -> &'static str {
        let tensor = matches!(cell, Some(Cell::Quadrilateral | Cell::Hexahedron));
        match (self, tensor) {
            (Family::Real, _) => "R",
            (Family::Lagrange, false) => "P",
            (Family::Lagrange, true) => "Q",
            (Family::DiscontinuousLagrange, false) => "DP",
            (Family::DiscontinuousLagrange, true) => "DQ",
        }
    }
}

/// A (possibly cell-less) finite element with a value shape.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Element {
    family: Family,
    degree: u32,
    cell: Option<Cell>,
    value_shape: Vec<usize>,
}

impl Element {
    /// General constructor.
    pub fn new(family: Family, degree: u32, cell: Option<Cell>, value_shape: Vec<usize>) -> Self {
        Element {
            family,
            degree,
            cell,
            value_shape,
        }
    }

    /// The real element of degree zero with the given value shape, not yet on any cell.
    pub fn real(value_shape: &[usize]) -> Self {
        Element::new(Family::Real, 0, None, value_shape.to_vec())
    }

    /// The same element on a different reference cell.
    pub fn reconstruct(&self, cell: Cell) -> Self {
        Element {
            cell: Some(cell),
            ..self.clone()
        }
    }

    /// Element family.
    pub fn family(&self) -> Family {
        self.family
    }

    /// Polynomial degree.
    pub fn degree(&self) -> u32 {
        self.degree
    }

    /// Reference cell, `None` until reconstructed on a mesh.
    pub fn cell(&self) -> Option<Cell> {
        self.cell
    }

    /// Shape of a value at one point.
    pub fn value_shape(&self) -> &[usize] {
        &self.value_shape
    }
}

/// What a parameter needs from a mesh to rebuild its function space.
pub trait Mesh {
    /// Mesh name, used to key checkpoint entries.
    fn name(&self) -> &str;
    /// Reference cell of every mesh entity of top dimension.
    fn cell(&self) -> Cell;
}

/// Minimal concrete mesh descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MeshInfo {
    name: String,
    cell: Cell,
}

impl MeshInfo {
    pub fn new(name: impl Into<String>, cell: Cell) -> Self {
        MeshInfo {
            name: name.into(),
            cell,
        }
    }
}

impl Mesh for MeshInfo {
    fn name(&self) -> &str {
        &self.name
    }

    fn cell(&self) -> Cell {
        self.cell
    }
}

/// An element bound to a named mesh.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FunctionSpace {
    mesh_name: String,
    element: Element,
}

impl FunctionSpace {
    pub fn new(mesh: &impl Mesh, element: Element) -> Self {
        FunctionSpace {
            mesh_name: mesh.name().to_owned(),
            element,
        }
    }

    /// Name of the mesh this space lives on.
    pub fn mesh_name(&self) -> &str {
        &self.mesh_name
    }

    pub fn element(&self) -> &Element {
        &self.element
    }

    /// Derived space name, e.g. `R0_triangle_2x2`. Scalar spaces omit the shape suffix.
    pub fn name(&self) -> String {
        let e = &self.element;
        let cell = e.cell.map_or("none", Cell::name);
        let mut name = format!("{}{}_{}", e.family.short_name(e.cell), e.degree, cell);
        if !e.value_shape.is_empty() {
            let dims: Vec<String> = e.value_shape.iter().map(usize::to_string).collect();
            name.push('_');
            name.push_str(&dims.join("x"));
        }
        name
    }
}
