use clap::{arg,crate_version,ArgAction,Command,ValueHint};

pub fn build_cli() -> Command {
    let long_help = "ps2kit is always invoked with exactly one of several subcommands.
The memory card image is named with the global --image option.
Set RUST_LOG environment variable to control logging level.
  levels: trace,debug,info,warn,error

Examples:
---------
create a new card:      `ps2kit --image card.ps2 format`
list the root:          `ps2kit --image card.ps2 ls`
import a save:          `ps2kit --image card.ps2 import mygame.psu`
export to MAX Drive:    `ps2kit --image card.ps2 export -m BESLES-12345`";

    let mut main_cmd = Command::new("ps2kit")
        .about("Manipulates PS2 memory card images and save archives.")
        .after_long_help(long_help)
        .version(crate_version!())
        .arg(
            arg!(--image <PATH> "path to the memory card image")
                .value_hint(ValueHint::FilePath)
                .global(true)
                .required(false),
        )
        .arg(
            arg!(--"ignore-ecc" "ignore ECC errors while reading")
                .global(true)
                .action(ArgAction::SetTrue),
        );
    main_cmd = main_cmd.subcommand(
        Command::new("ls")
            .arg(arg!(-c --"creation-time" "display creation times").action(ArgAction::SetTrue))
            .arg(arg!([directory] ... "directories to list").required(false))
            .about("list the contents of a directory"),
    );
    main_cmd = main_cmd.subcommand(
        Command::new("extract")
            .arg(arg!(-o --output <FILE> "extract file to FILE").required(false))
            .arg(arg!(-d --directory <DIR> "extract files from DIR").required(false))
            .arg(arg!(-p --"use-stdout" "extract files to standard output").action(ArgAction::SetTrue))
            .arg(arg!(<filename> ... "files to extract"))
            .about("extract files from the memory card"),
    );
    main_cmd = main_cmd.subcommand(
        Command::new("add")
            .arg(arg!(-d --directory <DIR> "add files to DIR").required(false))
            .arg(arg!(<filename> ... "local files to add"))
            .about("add files to the memory card"),
    );
    main_cmd = main_cmd.subcommand(
        Command::new("mkdir")
            .arg(arg!(<directory> ... "directories to create"))
            .about("make directories"),
    );
    main_cmd = main_cmd.subcommand(
        Command::new("remove")
            .arg(arg!(<filename> ... "files or empty directories to remove"))
            .about("remove files and directories"),
    );
    main_cmd = main_cmd.subcommand(
        Command::new("import")
            .arg(arg!(-i --"ignore-existing" "ignore saves that already exist on the image")
                .action(ArgAction::SetTrue))
            .arg(arg!(-d --directory <DEST> "import to DEST").required(false))
            .arg(arg!(<savefile> ... "save archives to import"))
            .about("import save archives into the memory card"),
    );
    main_cmd = main_cmd.subcommand(
        Command::new("export")
            .arg(arg!(-f --"overwrite-existing" "overwrite any save archives already exported")
                .action(ArgAction::SetTrue))
            .arg(arg!(-i --"ignore-existing" "ignore any save archives already exported")
                .action(ArgAction::SetTrue))
            .arg(arg!(-o --"output-file" <FILE> "use FILE as the name of the save archive")
                .required(false))
            .arg(arg!(-d --directory <DIR> "export save archives to local DIR").required(false))
            .arg(arg!(-l --longnames "generate longer, more descriptive, file names")
                .action(ArgAction::SetTrue))
            .arg(arg!(-p --ems "use the EMS .psu format [default]").action(ArgAction::SetTrue))
            .arg(arg!(-m --"max-drive" "use the MAX Drive .max format").action(ArgAction::SetTrue))
            .arg(arg!(<dirname> ... "save directories to export"))
            .about("export saves from the memory card"),
    );
    main_cmd = main_cmd.subcommand(
        Command::new("delete")
            .arg(arg!(<dirname> ... "directories to delete"))
            .about("recursively delete a directory (save)"),
    );
    for (name,about) in [("set","set mode flags on files and directories"),
                         ("clear","clear mode flags on files and directories")] {
        main_cmd = main_cmd.subcommand(
            Command::new(name)
                .arg(arg!(-p --protected "copy protected flag").action(ArgAction::SetTrue))
                .arg(arg!(-P --psx "PSX flag").action(ArgAction::SetTrue))
                .arg(arg!(-K --pocketstation "PocketStation flag").action(ArgAction::SetTrue))
                .arg(arg!(-H --hidden "hidden flag").action(ArgAction::SetTrue))
                .arg(arg!(-r --read "read allowed flag").action(ArgAction::SetTrue))
                .arg(arg!(-w --write "write allowed flag").action(ArgAction::SetTrue))
                .arg(arg!(-x --execute "executable flag").action(ArgAction::SetTrue))
                .arg(arg!(-X --"hex-value" <MODE> "set mode to MODE").required(false))
                .arg(arg!(<filename> ... "files to modify"))
                .about(about),
        );
    }
    main_cmd = main_cmd.subcommand(
        Command::new("dir")
            .about("display save information"),
    );
    main_cmd = main_cmd.subcommand(
        Command::new("df")
            .about("display the amount of free space"),
    );
    main_cmd = main_cmd.subcommand(
        Command::new("check")
            .about("check for file system errors"),
    );
    main_cmd = main_cmd.subcommand(
        Command::new("format")
            .arg(arg!(-c --clusters <N> "size in clusters of the memory card").required(false))
            .arg(arg!(-f --"overwrite-existing" "overwrite any existing file").action(ArgAction::SetTrue))
            .arg(arg!(-e --"no-ecc" "create an image without ECC").action(ArgAction::SetTrue))
            .about("create a new memory card image"),
    );
    return main_cmd;
}
