fn main() {
    #[cfg(feature = "mpi")]
    {
        println!("cargo:rustc-link-lib=mpi");
        cc::Build::new().file("src/mpi/shim.c").compile("fieldcoupler_mpi_shim.a");
    }
}
