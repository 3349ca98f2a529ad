use gridagg_climatology::python::climatology;
use gridagg_core::python::core;
use pyo3::prelude::*;
use pyo3::wrap_pymodule;

#[pymodule]
#[pyo3(name = "_lib")]
fn gridagg(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    m.add_wrapped(wrap_pymodule!(core))?;
    m.add_wrapped(wrap_pymodule!(climatology))?;

    set_path(m, "gridagg._lib.core", "core")?;
    set_path(m, "gridagg._lib.climatology", "climatology")?;

    Ok(())
}

/// Register a submodule in `sys.modules` so `import gridagg._lib.<module>` works
fn set_path(m: &Bound<'_, PyModule>, path: &str, module: &str) -> PyResult<()> {
    let code = format!(
        "\
import sys
sys.modules['{path}'] = {module}
    "
    );
    m.py().run_bound(&code, None, Some(&m.dict()))
}
