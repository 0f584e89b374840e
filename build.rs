use std::fs;

fn main() {
    // The server embeds everything under static/, including the docs tree
    // that prepare-docs drops there after the crate was first built.
    println!("cargo:rerun-if-changed=static");

    fs::create_dir_all("static").expect("failed to create static directory");
}
