#![forbid(unsafe_code)]

fn main() {
    pysu_rs::pysu_main()
}
