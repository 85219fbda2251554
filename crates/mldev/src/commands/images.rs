use colored::Colorize;
use mldev_build::{BASE_IMAGES, DEFAULT_BASE_IMAGE};

pub fn handle() {
    println!("{}", "Base images:".bold());
    for (key, image) in BASE_IMAGES {
        if *key == DEFAULT_BASE_IMAGE {
            println!("  {} {} {}", format!("{:<12}", key).cyan(), image, "(default)".green());
        } else {
            println!("  {} {}", format!("{:<12}", key).cyan(), image);
        }
    }
}
