use std::path::Path;

fn main() {
    let crate_root = Path::new(env!("CARGO_MANIFEST_DIR"));

    let target_os = std::env::var("CARGO_CFG_TARGET_OS").expect("Missing target_os");

    if target_os != "none" {
        return;
    }

    let out_dir = crate_root.join("build");
    std::fs::create_dir_all(&out_dir).expect("create build/ output dir");

    assemble(&crate_root, "boot/entry.asm", &out_dir.join("boot_entry.o"));
    assemble(&crate_root, "boot/isr_stubs.asm", &out_dir.join("isr_stubs.o"));

    let linker_args = [
        &format!(
            "--script={}",
            crate_root.join("build_config/linker.ld").display()
        ),
        "-nmagic",
        "-zcommon-page-size=0x1000",
        "-zmax-page-size=0x1000",
        "-zstack-size=0x4000",
        &format!("{}", out_dir.join("boot_entry.o").display()),
        &format!("{}", out_dir.join("isr_stubs.o").display()),
    ];

    for arg in linker_args {
        println!("cargo:rustc-link-arg-bins={arg}");
    }

    println!("cargo:rerun-if-changed=build_config/linker.ld");
    println!("cargo:rerun-if-changed=boot/entry.asm");
    println!("cargo:rerun-if-changed=boot/isr_stubs.asm");
}

fn assemble(crate_root: &Path, src: &str, out: &Path) {
    let status = std::process::Command::new("nasm")
        .args(["-f", "elf32", "-o"])
        .arg(out)
        .arg(crate_root.join(src))
        .status()
        .expect("failed to invoke nasm (required to assemble boot/*.asm)");
    assert!(status.success(), "nasm failed assembling {}", src);
}
