//! Build script for torus-contention
//!
//! Without the `mpi` feature there is nothing to do: the in-process backend
//! is pure Rust. With it, this script:
//! 1. Finds the MPI installation via pkg-config, mpicc or well-known prefixes
//! 2. Compiles the C shim (`csrc/contention_mpi.c`)
//! 3. Links against the MPI library

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    #[cfg(feature = "mpi")]
    shim::build();
}

#[cfg(feature = "mpi")]
mod shim {
    use std::env;
    use std::path::PathBuf;
    use std::process::Command;

    struct MpiConfig {
        include_paths: Vec<PathBuf>,
        link_paths: Vec<PathBuf>,
        libs: Vec<String>,
    }

    pub fn build() {
        println!("cargo:rerun-if-changed=csrc/contention_mpi.c");
        println!("cargo:rerun-if-changed=csrc/contention_mpi.h");
        println!("cargo:rerun-if-env-changed=MPI_PKG_CONFIG");
        println!("cargo:rerun-if-env-changed=MPICC");

        let mpi_config = find_mpi_config();

        let mut build = cc::Build::new();
        build
            .file("csrc/contention_mpi.c")
            .include("csrc")
            .warnings(true)
            .extra_warnings(true);
        for path in &mpi_config.include_paths {
            build.include(path);
        }
        if env::var("PROFILE").unwrap_or_default() == "release" {
            build.opt_level(3);
        }
        build.compile("contention_mpi");

        for path in &mpi_config.link_paths {
            println!("cargo:rustc-link-search=native={}", path.display());
            // RPATH so the binary finds the same libmpi at runtime
            println!("cargo:rustc-link-arg=-Wl,-rpath,{}", path.display());
        }
        for lib in &mpi_config.libs {
            println!("cargo:rustc-link-lib={lib}");
        }
    }

    fn find_mpi_config() -> MpiConfig {
        if let Ok(pkg_name) = env::var("MPI_PKG_CONFIG") {
            if let Ok(config) = try_pkg_config(&pkg_name) {
                eprintln!("Found MPI via MPI_PKG_CONFIG={pkg_name}");
                return config;
            }
        }

        for pkg_name in &["mpich", "ompi", "mpi"] {
            if let Ok(config) = try_pkg_config(pkg_name) {
                eprintln!("Found MPI via pkg-config: {pkg_name}");
                return config;
            }
        }

        if let Some(config) = try_mpicc() {
            eprintln!("Found MPI via mpicc");
            return config;
        }

        if let Ok(mpich_dir) = env::var("CRAY_MPICH_DIR") {
            eprintln!("Found Cray MPI at {mpich_dir}");
            return prefix_config(&mpich_dir);
        }

        for prefix in &["/usr", "/usr/local", "/opt/mpich", "/opt/openmpi"] {
            if PathBuf::from(format!("{prefix}/include/mpi.h")).exists() {
                eprintln!("Found MPI at {prefix}");
                return prefix_config(prefix);
            }
        }

        panic!(
            "Could not find an MPI installation for the `mpi` feature. Either:\n\
             - Set MPI_PKG_CONFIG to the pkg-config name (e.g., 'mpich')\n\
             - Ensure 'mpicc' (or $MPICC) is in PATH\n\
             - Set CRAY_MPICH_DIR on Cray systems"
        );
    }

    fn prefix_config(prefix: &str) -> MpiConfig {
        MpiConfig {
            include_paths: vec![PathBuf::from(format!("{prefix}/include"))],
            link_paths: vec![PathBuf::from(format!("{prefix}/lib"))],
            libs: vec!["mpi".to_string()],
        }
    }

    fn try_pkg_config(name: &str) -> Result<MpiConfig, pkg_config::Error> {
        let lib = pkg_config::Config::new()
            .cargo_metadata(false)
            .probe(name)?;
        Ok(MpiConfig {
            include_paths: lib.include_paths,
            link_paths: lib.link_paths,
            libs: lib.libs,
        })
    }

    fn try_mpicc() -> Option<MpiConfig> {
        let mpicc = env::var("MPICC").unwrap_or_else(|_| "mpicc".to_string());
        let output = Command::new(&mpicc).arg("-show").output().ok()?;
        if !output.status.success() {
            return None;
        }
        let shown = String::from_utf8_lossy(&output.stdout);

        let mut config = MpiConfig {
            include_paths: Vec::new(),
            link_paths: Vec::new(),
            libs: Vec::new(),
        };
        for part in shown.split_whitespace() {
            if let Some(path) = part.strip_prefix("-I") {
                config.include_paths.push(PathBuf::from(path));
            } else if let Some(path) = part.strip_prefix("-L") {
                config.link_paths.push(PathBuf::from(path));
            } else if let Some(lib) = part.strip_prefix("-l") {
                config.libs.push(lib.to_string());
            }
        }
        if config.libs.is_empty() {
            config.libs.push("mpi".to_string());
        }
        Some(config)
    }
}
